//! tmux passthrough wrapping (spec §4.E "Wire format").
//!
//! Grounded on `examples/benjajaja-ratatui-image/src/picker/cap_parser.rs`'s
//! `Parser::escape_tmux`.

/// Returns `(start, escape, end)` for wrapping a sequence of KGP commands.
/// Outside tmux, `escape` is plain `ESC` and `start`/`end` are empty.
/// Inside tmux (`num_tmux_layers >= 1`), the whole sequence is wrapped in
/// `ESC Ptmux;` / `ESC \`, and every inner `ESC` is doubled, once per
/// layer.
pub fn escape_tmux(num_tmux_layers: u32) -> (String, String, String) {
    if num_tmux_layers == 0 {
        return (String::new(), "\x1b".to_string(), String::new());
    }
    let mut escape = "\x1b".to_string();
    for _ in 0..num_tmux_layers {
        escape = format!("{escape}{escape}");
    }
    ("\x1bPtmux;".to_string(), escape, "\x1b\\".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_layers_is_plain_escape() {
        let (start, escape, end) = escape_tmux(0);
        assert_eq!(start, "");
        assert_eq!(escape, "\x1b");
        assert_eq!(end, "");
    }

    #[test]
    fn one_layer_doubles_escape_once() {
        let (start, escape, end) = escape_tmux(1);
        assert_eq!(start, "\x1bPtmux;");
        assert_eq!(escape, "\x1b\x1b");
        assert_eq!(end, "\x1b\\");
    }

    #[test]
    fn two_layers_doubles_escape_twice() {
        let (_, escape, _) = escape_tmux(2);
        assert_eq!(escape, "\x1b\x1b\x1b\x1b");
    }
}
