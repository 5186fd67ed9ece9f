//! Framed payloads on the guest serial console.
//!
//! A function reports its result by printing a frame:
//!
//! ```text
//! JSON_RESULT_START
//! { "total": 2, "ok": 1, "failed": 1 }
//! JSON_RESULT_END
//! ```
//!
//! The log interleaves vmm diagnostics with guest output, so frames are
//! located by content, never by line position.

/// Marker for a single-line base64 payload.
pub const BASE64_IMAGE: &str = "BASE64_IMAGE";
/// Marker for a JSON payload, possibly spanning multiple lines.
pub const JSON_RESULT: &str = "JSON_RESULT";
/// Bare handshake line the guest emits once its runtime is warm and it is
/// safe to snapshot.
pub const SNAPSHOT_READY: &str = "SNAPSHOT_READY";

pub fn start_marker(marker: &str) -> String {
    format!("{marker}_START")
}

pub fn end_marker(marker: &str) -> String {
    format!("{marker}_END")
}

/// Extract the payload delimited by `<marker>_START` and `<marker>_END`.
///
/// Takes the first start marker and the next end marker after it; the
/// payload is the bytes in between with surrounding whitespace stripped.
/// Returns `None` for absent or truncated frames.
pub fn extract<'a>(output: &'a str, marker: &str) -> Option<&'a str> {
    let start_tag = start_marker(marker);
    let end_tag = end_marker(marker);

    let start = output.find(&start_tag)? + start_tag.len();
    let end = output[start..].find(&end_tag)? + start;

    Some(output[start..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_payload_between_markers() {
        let log = "boot noise\nBASE64_IMAGE_START\niVBORw0KGgo=\nBASE64_IMAGE_END\nshutdown\n";
        assert_eq!(extract(log, BASE64_IMAGE), Some("iVBORw0KGgo="));
    }

    #[test]
    fn strips_surrounding_whitespace_only() {
        let log = "JSON_RESULT_START\n  {\n  \"ok\": 1\n}  \nJSON_RESULT_END\n";
        assert_eq!(extract(log, JSON_RESULT), Some("{\n  \"ok\": 1\n}"));
    }

    #[test]
    fn multiline_payload_survives() {
        let payload = "{\n  \"total\": 2,\n  \"ok\": 1\n}";
        let log = format!("JSON_RESULT_START\n{payload}\nJSON_RESULT_END\n");
        assert_eq!(extract(&log, JSON_RESULT), Some(payload));
    }

    #[test]
    fn truncated_frame_yields_none() {
        let log = "BASE64_IMAGE_START\niVBORw0KGgo=\n";
        assert_eq!(extract(log, BASE64_IMAGE), None);
    }

    #[test]
    fn absent_frame_yields_none() {
        assert_eq!(extract("just kernel output", JSON_RESULT), None);
    }

    #[test]
    fn end_marker_before_start_is_not_a_frame() {
        let log = "JSON_RESULT_END\nJSON_RESULT_START\n{}\n";
        assert_eq!(extract(log, JSON_RESULT), None);
    }

    #[test]
    fn first_frame_wins_when_repeated() {
        let log = "JSON_RESULT_START\n1\nJSON_RESULT_END\nJSON_RESULT_START\n2\nJSON_RESULT_END\n";
        assert_eq!(extract(log, JSON_RESULT), Some("1"));
    }
}
