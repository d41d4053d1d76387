//! Unit tests for the worker console line codec.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use craftplane::orchestrator::supervisor::{describe_exit, ConsoleCodec, MAX_LINE_BYTES};
use craftplane::AppError;

#[test]
fn crlf_and_lf_lines_decode_cleanly() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from("[INFO] Starting\r\n[INFO] Done\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("[INFO] Starting".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("[INFO] Done".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from("[INFO] Prep");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    buf.extend_from_slice(b"aring spawn area\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("[INFO] Preparing spawn area".to_owned())
    );
}

#[test]
fn trailing_text_without_newline_is_emitted_at_eof() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::from("> ");
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("> ".to_owned()));
}

#[test]
fn overlong_line_is_protocol_error_and_decoding_recovers() {
    let mut codec = ConsoleCodec::new();
    let mut buf = BytesMut::with_capacity(MAX_LINE_BYTES + 16);
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 1]);
    buf.extend_from_slice(b"\nnext\n");

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("line too long")));

    // The remainder of the oversized line is discarded, the next one survives.
    let mut next = None;
    for _ in 0..3 {
        if let Ok(Some(line)) = codec.decode(&mut buf) {
            next = Some(line);
            break;
        }
    }
    assert_eq!(next.as_deref(), Some("next"));
}

#[cfg(unix)]
#[test]
fn exit_descriptions_cover_codes_and_signals() {
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    assert_eq!(describe_exit(Some(ExitStatus::from_raw(0))), "exited normally (code 0)");
    assert_eq!(describe_exit(Some(ExitStatus::from_raw(3 << 8))), "exited with code 3");
    assert_eq!(describe_exit(Some(ExitStatus::from_raw(9))), "terminated by signal");
    assert_eq!(describe_exit(None), "status unknown");
}
