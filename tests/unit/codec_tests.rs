//! Unit tests for the output line codec.

use futures_util::StreamExt;
use tokio_util::codec::FramedRead;

use cldpd::codec::{OutputCodec, MAX_LINE_BYTES};
use cldpd::DispatchError;

async fn decode_all(data: &[u8]) -> Vec<Result<String, DispatchError>> {
    let mut frames = FramedRead::new(data, OutputCodec::new());
    let mut out = Vec::new();
    while let Some(item) = frames.next().await {
        out.push(item);
    }
    out
}

#[tokio::test]
async fn splits_on_line_feed() {
    let lines = decode_all(b"alpha\nbeta\ngamma\n").await;
    let lines: Vec<String> = lines.into_iter().map(|r| r.expect("decoded line")).collect();
    assert_eq!(lines, ["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn strips_carriage_return_before_line_feed() {
    let lines = decode_all(b"alpha\r\nbeta\r\n").await;
    let lines: Vec<String> = lines.into_iter().map(|r| r.expect("decoded line")).collect();
    assert_eq!(lines, ["alpha", "beta"]);
}

#[tokio::test]
async fn emits_final_unterminated_line() {
    let lines = decode_all(b"alpha\ntail without newline").await;
    let lines: Vec<String> = lines.into_iter().map(|r| r.expect("decoded line")).collect();
    assert_eq!(lines, ["alpha", "tail without newline"]);
}

#[tokio::test]
async fn preserves_empty_lines() {
    let lines = decode_all(b"\n\nx\n").await;
    let lines: Vec<String> = lines.into_iter().map(|r| r.expect("decoded line")).collect();
    assert_eq!(lines, ["", "", "x"]);
}

#[tokio::test]
async fn no_trailing_content_yields_nothing_extra() {
    let lines = decode_all(b"only\n").await;
    assert_eq!(lines.len(), 1);
}

#[tokio::test]
async fn overlong_line_is_an_io_error() {
    let mut data = vec![b'a'; MAX_LINE_BYTES + 1];
    data.push(b'\n');
    let mut frames = FramedRead::new(&data[..], OutputCodec::new());
    let first = frames.next().await.expect("one item");
    let err = first.expect_err("line over the ceiling fails to decode");
    assert!(matches!(err, DispatchError::Io(_)), "got {err:?}");
    assert!(err.to_string().contains("output line too long"));
}

#[tokio::test]
async fn line_at_the_ceiling_still_decodes() {
    let mut data = vec![b'a'; MAX_LINE_BYTES];
    data.push(b'\n');
    let lines = decode_all(&data).await;
    assert_eq!(lines.len(), 1);
    let line = lines.into_iter().next().expect("one line").expect("decoded");
    assert_eq!(line.len(), MAX_LINE_BYTES);
}
