//! `--print FORMAT` token substitution (spec §6 "Format specifier string"),
//! the CLI-only layer above `ikup::formula` used by `list`/`forget`/`dirty`/
//! `reupload`/`fix` to print per-image information.
//!
//! Grounded on `examples/original_source/ikup/cli.py::format_info_string`:
//! the same escape set (`\\ \n \t \r \e`) and format specifiers (`%i %x %c
//! %r %p %P %m %a %D`), scanned left to right. Per spec.md §9's open
//! question about the Python original's two overlapping, non-`elif`
//! `if`s for escape vs. format parsing, this implementation treats them as
//! mutually exclusive per character position (an explicit `elif`), so a
//! `\` is never re-examined as a `%`-introducer at the same index.

use ikup::error::{Error, Result};

/// Everything a `%`-specifier might need: the durable id info plus,
/// optionally, the instance data recovered from its description. `instance`
/// is `None` when the description couldn't be parsed back into a path/
/// cols/rows, matching `cli.py`'s `inst is None` branch.
pub struct FormatContext<'a> {
    pub id: u32,
    pub description: &'a str,
    pub atime: i64,
    pub instance: Option<FormatInstance<'a>>,
}

pub struct FormatInstance<'a> {
    pub path: &'a str,
    pub mtime: i64,
    pub cols: u32,
    pub rows: u32,
}

pub fn format(template: &str, ctx: &FormatContext) -> Result<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            i += 1;
            match chars[i] {
                '\\' => out.push('\\'),
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'e' => out.push('\x1b'),
                other => {
                    return Err(Error::FormulaError(format!(
                        "unknown escape sequence: \\{other}"
                    )));
                }
            }
            i += 1;
            continue;
        }
        if c == '%' && i + 1 < chars.len() {
            i += 1;
            match chars[i] {
                '%' => out.push('%'),
                'i' => out.push_str(&ctx.id.to_string()),
                'x' => out.push_str(&format!("{:08x}", ctx.id)),
                'c' => out.push_str(
                    &ctx.instance
                        .as_ref()
                        .map(|inst| inst.cols.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                ),
                'r' => out.push_str(
                    &ctx.instance
                        .as_ref()
                        .map(|inst| inst.rows.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                ),
                'p' => out.push_str(ctx.instance.as_ref().map(|inst| inst.path).unwrap_or("/dev/null")),
                'P' => out.push_str(ctx.instance.as_ref().map(|inst| inst.path).unwrap_or(ctx.description)),
                'm' => out.push_str(
                    &ctx.instance
                        .as_ref()
                        .map(|inst| inst.mtime.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                ),
                'a' => out.push_str(&ctx.atime.to_string()),
                'D' => out.push_str(ctx.description),
                other => {
                    return Err(Error::FormulaError(format!(
                        "unknown format specifier: %{other}"
                    )));
                }
            }
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    Ok(out)
}

/// The help text for `ikup help print` (`cli.py`'s `HELP_PRINT`).
pub const HELP_PRINT: &str = "\
The --print (-p) option takes a string argument which may use the following
format specifiers:

    %%  A literal %
    %i  The image ID (decimal)
    %x  The image ID (hexadecimal), with leading zeros, but without '0x'
    %c  The number of columns of the image or '?' if not known
    %r  The number of rows of the image or '?' if not known
    %p  The path to the image file or '/dev/null' if not known
    %P  The path to the image file or the description if not known
    %m  The modified time of the (original) image or '?' if not known
    %a  The access time of the image/ID in the ID database
    %D  The description of the image (likely json)

It may also use escape sequences: \\\\, \\n, \\t, \\r, \\e
";

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_without_instance() -> FormatContext<'static> {
        FormatContext {
            id: 42,
            description: "some-description",
            atime: 1000,
            instance: None,
        }
    }

    #[test]
    fn substitutes_id_and_hex() {
        let ctx = ctx_without_instance();
        assert_eq!(format("%i %x", &ctx).unwrap(), "42 0000002a");
    }

    #[test]
    fn missing_instance_fields_render_as_question_mark() {
        let ctx = ctx_without_instance();
        assert_eq!(format("%c x %r", &ctx).unwrap(), "? x ?");
        assert_eq!(format("%p", &ctx).unwrap(), "/dev/null");
        assert_eq!(format("%P", &ctx).unwrap(), "some-description");
    }

    #[test]
    fn instance_fields_take_precedence() {
        let ctx = FormatContext {
            id: 7,
            description: "desc",
            atime: 5,
            instance: Some(FormatInstance {
                path: "/tmp/a.png",
                mtime: 123,
                cols: 10,
                rows: 20,
            }),
        };
        assert_eq!(format("%c %r %p %m", &ctx).unwrap(), "10 20 /tmp/a.png 123");
    }

    #[test]
    fn escape_sequences_are_translated() {
        let ctx = ctx_without_instance();
        assert_eq!(format("a\\nb\\tc", &ctx).unwrap(), "a\nb\tc");
    }

    #[test]
    fn unknown_specifier_is_an_error() {
        let ctx = ctx_without_instance();
        assert!(format("%q", &ctx).is_err());
    }

    #[test]
    fn unknown_escape_is_an_error() {
        let ctx = ctx_without_instance();
        assert!(format("\\q", &ctx).is_err());
    }

    #[test]
    fn literal_percent_and_default_print_template() {
        let ctx = FormatContext {
            id: 1,
            description: "/tmp/a.png:100:5x10",
            atime: 0,
            instance: Some(FormatInstance {
                path: "/tmp/a.png",
                mtime: 100,
                cols: 5,
                rows: 10,
            }),
        };
        assert_eq!(format("%i\t%cx%r\t%P", &ctx).unwrap(), "1\t5x10\t/tmp/a.png");
    }
}
