//! §6 session detection: terminal/session identity, tmux/SSH presence, and
//! cell size, used to resolve `"auto"` config fields (spec §6 "Terminal
//! detection").
//!
//! Grounded on `examples/original_source/tupimage/terminal_detection.py`
//! (`is_inside_tmux`, `tmux_display_message`, `detect_terminal_info`,
//! `remove_bad_chars`) and the teacher's `src/picker.rs::font_size` for cell
//! size via `rustix::termios::tcgetwinsize`.
//!
//! Scope reduction from the original: `get_terminal_and_shell_pid` walks
//! the OS process tree with `psutil`; no crate in this stack offers that
//! (no `sysinfo`/`procfs`), so the non-tmux fallback here uses `$WINDOWID`
//! and the process's own pid instead of a discovered shell pid. Still
//! produces a terminal id stable for the lifetime of one shell session,
//! which is what callers need it for.

use std::process::Command;

fn remove_bad_chars(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `$TMUX` is set and non-empty (spec: "is_inside_tmux").
pub fn is_inside_tmux() -> bool {
    std::env::var("TMUX").is_ok_and(|v| !v.is_empty())
}

/// SSH session detection for the upload transport's `auto` resolution
/// (spec §4.D "Transport selection").
pub fn is_inside_ssh() -> bool {
    for var in ["SSH_TTY", "SSH_CONNECTION", "SSH_CLIENT"] {
        if std::env::var(var).is_ok_and(|v| !v.is_empty()) {
            return true;
        }
    }
    false
}

fn tmux_display_message(format: &str) -> Option<String> {
    let output = Command::new("tmux")
        .args(["display-message", "-p", format])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Identity the display/upload machinery keys its id and upload tables on
/// (spec §6 "Terminal identification").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    pub terminal_name: String,
    pub terminal_id: String,
    pub session_id: String,
}

/// `detect_terminal_info()`.
pub fn detect_terminal_info() -> TerminalInfo {
    if is_inside_tmux() {
        if let Some(info) = detect_tmux_terminal_info() {
            return info;
        }
    }

    let terminal_name = std::env::var("TERM").unwrap_or_else(|_| "unknown-terminal".to_string());
    let terminal_id = match std::env::var("WINDOWID") {
        Ok(window_id) => format!("{terminal_name}-windowid-{window_id}"),
        Err(_) => format!("{terminal_name}-{}", std::process::id()),
    };
    let terminal_id = remove_bad_chars(&terminal_id);

    TerminalInfo {
        terminal_name,
        terminal_id: terminal_id.clone(),
        session_id: terminal_id,
    }
}

fn detect_tmux_terminal_info() -> Option<TerminalInfo> {
    let raw = tmux_display_message(
        "#{client_termname}||||#{client_pid}||||#{pid}_#{session_id}",
    )?;
    let mut parts = raw.split("||||");
    let term_name = parts.next()?;
    let client_pid = parts.next()?;
    let pid_session = parts.next()?;

    Some(TerminalInfo {
        terminal_name: remove_bad_chars(term_name),
        terminal_id: remove_bad_chars(&format!("tmux-client-{term_name}-{client_pid}")),
        session_id: remove_bad_chars(&format!("tmux-{pid_session}")),
    })
}

/// Terminal cell size in pixels, queried from the tty (spec §6 "cell size
/// detection"). Not available on a non-tty stdout (e.g. piped output).
#[cfg(unix)]
pub fn detect_cell_size() -> Option<(u32, u32)> {
    let stdout = rustix::stdio::stdout();
    let winsize = rustix::termios::tcgetwinsize(stdout).ok()?;
    if winsize.ws_xpixel == 0 || winsize.ws_ypixel == 0 || winsize.ws_col == 0 || winsize.ws_row == 0 {
        return None;
    }
    Some((
        (winsize.ws_xpixel / winsize.ws_col) as u32,
        (winsize.ws_ypixel / winsize.ws_row) as u32,
    ))
}

#[cfg(not(unix))]
pub fn detect_cell_size() -> Option<(u32, u32)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_characters_outside_identifier_set() {
        assert_eq!(remove_bad_chars("xterm-256color"), "xterm-256color");
        assert_eq!(remove_bad_chars("a b/c.d"), "a_b_c_d");
    }

    #[test]
    fn not_inside_tmux_without_env_var() {
        // SAFETY: test-local mutation of the process environment, no other
        // thread in this test binary reads TMUX concurrently.
        unsafe { std::env::remove_var("TMUX") };
        assert!(!is_inside_tmux());
    }

    #[test]
    fn ssh_detection_checks_all_three_vars() {
        unsafe {
            std::env::remove_var("SSH_TTY");
            std::env::remove_var("SSH_CONNECTION");
            std::env::remove_var("SSH_CLIENT");
        }
        assert!(!is_inside_ssh());
        unsafe { std::env::set_var("SSH_TTY", "/dev/pts/3") };
        assert!(is_inside_ssh());
        unsafe { std::env::remove_var("SSH_TTY") };
    }

    #[test]
    fn fallback_terminal_info_uses_term_and_pid() {
        unsafe {
            std::env::remove_var("TMUX");
            std::env::set_var("TERM", "xterm-test");
            std::env::remove_var("WINDOWID");
        }
        let info = detect_terminal_info();
        assert_eq!(info.terminal_name, "xterm-test");
        assert!(info.terminal_id.starts_with("xterm-test-"));
        assert_eq!(info.terminal_id, info.session_id);
    }
}
