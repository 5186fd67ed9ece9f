use crate::frame;
use serde_json::Value;

/// Decoded outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Parsed payload of a `JSON_RESULT` frame.
    Json(Value),
    /// Payload of a `BASE64_IMAGE` frame, left encoded; the caller decides
    /// whether and where to decode it.
    Image(String),
    /// No usable frame; carries the raw serial log.
    Failure(String),
}

/// Classify a serial log into an [`Output`].
///
/// A parseable JSON frame wins over an image frame. A malformed JSON
/// payload falls through instead of masking an image result.
pub fn decode(raw: &str) -> Output {
    if let Some(payload) = frame::extract(raw, frame::JSON_RESULT)
        && let Ok(value) = serde_json::from_str::<Value>(payload)
    {
        return Output::Json(value);
    }

    if let Some(payload) = frame::extract(raw, frame::BASE64_IMAGE) {
        return Output::Image(payload.to_string());
    }

    Output::Failure(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_frame_decodes() {
        let log = "boot\nJSON_RESULT_START\n{\"total\": 2, \"ok\": 1, \"failed\": 1}\nJSON_RESULT_END\n";
        assert_eq!(
            decode(log),
            Output::Json(json!({ "total": 2, "ok": 1, "failed": 1 }))
        );
    }

    #[test]
    fn image_frame_decodes() {
        let log = "BASE64_IMAGE_START\niVBORw0KGgoAAAANSUhEUg==\nBASE64_IMAGE_END\n";
        assert_eq!(
            decode(log),
            Output::Image("iVBORw0KGgoAAAANSUhEUg==".to_string())
        );
    }

    #[test]
    fn json_wins_over_image() {
        let log = "BASE64_IMAGE_START\nabcd\nBASE64_IMAGE_END\n\
                   JSON_RESULT_START\n{\"ok\": true}\nJSON_RESULT_END\n";
        assert_eq!(decode(log), Output::Json(json!({ "ok": true })));
    }

    #[test]
    fn malformed_json_falls_through_to_image() {
        let log = "JSON_RESULT_START\nnot json at all\nJSON_RESULT_END\n\
                   BASE64_IMAGE_START\nabcd\nBASE64_IMAGE_END\n";
        assert_eq!(decode(log), Output::Image("abcd".to_string()));
    }

    #[test]
    fn malformed_json_without_image_is_failure() {
        let log = "JSON_RESULT_START\n{oops\nJSON_RESULT_END\n";
        assert_eq!(decode(log), Output::Failure(log.to_string()));
    }

    #[test]
    fn frameless_log_is_failure() {
        let log = "kernel panic: attempted to kill init!";
        assert_eq!(decode(log), Output::Failure(log.to_string()));
    }

    #[test]
    fn truncated_frame_is_failure() {
        let log = "JSON_RESULT_START\n{\"ok\": true}\n";
        assert_eq!(decode(log), Output::Failure(log.to_string()));
    }
}
