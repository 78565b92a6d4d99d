//! §4.E terminal response parsing (the `ESC _G <kv> ; <message> ESC \`
//! the terminal sends back for non-quiet commands).
//!
//! Grounded on `examples/original_source/tupimage/graphics_terminal.py`'s
//! `receive_response` (framing on the `ESC _G` / `ESC \` delimiters, the
//! `i=`/`I=` key scan, `message == "OK"` success check).

/// A parsed graphics-protocol response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphicsResponse {
    pub image_id: Option<u32>,
    pub image_number: Option<u32>,
    pub message: String,
    pub is_ok: bool,
}

/// Scan `buffer` for a complete `ESC _G ... ESC \` frame and parse it.
/// Returns `None` if no complete frame is present yet (spec §4.E: callers
/// re-poll with more bytes, same as `receive_response`'s read loop).
pub fn parse_response(buffer: &str) -> Option<GraphicsResponse> {
    let start = buffer.find("\x1b_G")?;
    let after_start = &buffer[start + 3..];
    let end = after_start.find("\x1b\\")?;
    let body = &after_start[..end];

    let mut parts = body.splitn(2, ';');
    let kv_part = parts.next().unwrap_or("");
    let message = parts.next().unwrap_or("").to_string();

    let mut response = GraphicsResponse {
        message: message.clone(),
        is_ok: message == "OK",
        ..Default::default()
    };

    for kv in kv_part.split(',') {
        if let Some(v) = kv.strip_prefix("i=") {
            response.image_id = v.parse().ok();
        } else if let Some(v) = kv.strip_prefix("I=") {
            response.image_number = v.parse().ok();
        }
    }
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_response_with_image_id() {
        let buf = "\x1b_Gi=42;OK\x1b\\";
        let resp = parse_response(buf).unwrap();
        assert_eq!(resp.image_id, Some(42));
        assert!(resp.is_ok);
        assert_eq!(resp.message, "OK");
    }

    #[test]
    fn parses_error_message() {
        let buf = "\x1b_Gi=7,I=3;EINVAL:bad size\x1b\\";
        let resp = parse_response(buf).unwrap();
        assert_eq!(resp.image_id, Some(7));
        assert_eq!(resp.image_number, Some(3));
        assert!(!resp.is_ok);
        assert_eq!(resp.message, "EINVAL:bad size");
    }

    #[test]
    fn incomplete_frame_returns_none() {
        assert!(parse_response("\x1b_Gi=1;OK").is_none());
        assert!(parse_response("garbage before").is_none());
    }

    #[test]
    fn ignores_leading_non_response_bytes() {
        let buf = "some prompt text\x1b_Gi=9;OK\x1b\\";
        let resp = parse_response(buf).unwrap();
        assert_eq!(resp.image_id, Some(9));
    }
}
