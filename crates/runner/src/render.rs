//! Terminal rendering of invocation results.
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::warn;
use protocol::result::Output;

/// Where a decoded image payload lands, relative to the caller.
pub const RESULT_IMAGE: &str = "result.png";

/// Print the outcome. JSON is pretty-printed; an image payload is decoded
/// and written to [`RESULT_IMAGE`]; a failure dumps the raw serial log so
/// nothing the guest said is lost.
pub fn render(output: &Output) {
    match output {
        Output::Json(value) => match serde_json::to_string_pretty(value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{value}"),
        },
        Output::Image(data) => match STANDARD.decode(data.as_bytes()) {
            Ok(bytes) => match std::fs::write(RESULT_IMAGE, &bytes) {
                Ok(()) => println!("image written to {RESULT_IMAGE} ({} bytes)", bytes.len()),
                Err(e) => warn!("cannot write {RESULT_IMAGE}: {e}"),
            },
            Err(e) => {
                warn!("image payload is not valid base64: {e}");
                println!("{data}");
            }
        },
        Output::Failure(raw) => {
            println!("no framed result; raw serial output follows");
            println!("{raw}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use protocol::result;

    #[test]
    fn framed_png_payload_decodes_to_png_bytes() {
        let png_header: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let log = format!(
            "boot noise\nBASE64_IMAGE_START\n{}\nBASE64_IMAGE_END\n",
            STANDARD.encode(png_header)
        );

        let Output::Image(data) = result::decode(&log) else {
            panic!("expected an image result");
        };
        let bytes = STANDARD.decode(data.as_bytes()).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47]);
    }
}
