//! Capture import feeding a session.

mod common;

use std::io::Write;
use std::sync::Arc;

use common::{tcp_packet, udp_packet, write_pcap};
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use layerscope_core::prelude::*;
use layerscope_core::{CaptureError, CaptureFormat, Compression};
use tempfile::NamedTempFile;

fn capture_file(records: &[(u32, u32, Vec<u8>, u32)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write_pcap(&mut file, records).unwrap();
    file.flush().unwrap();
    file
}

fn full(sec: u32, data: Vec<u8>) -> (u32, u32, Vec<u8>, u32) {
    let len = data.len() as u32;
    (sec, 500, data, len)
}

#[test]
fn test_import_and_filter() {
    let file = capture_file(&[
        full(1, udp_packet(53, 40000, b"answer")),
        full(2, tcp_packet(40000, 443, 1, b"")),
        full(3, udp_packet(40000, 53, b"query")),
    ]);

    let reader = CaptureReader::open(file.path()).unwrap();
    assert_eq!(reader.format(), CaptureFormat::LegacyLeMicro);
    assert_eq!(reader.compression(), Compression::None);

    let session = Session::new(Arc::new(default_registry()), SessionConfig::default());
    let predicate = compile("udp.src == 53 || udp.dst == 53", &AliasTable::new()).unwrap();

    let mut matched = Vec::new();
    for raw in reader {
        let frame = session.ingest(raw.unwrap()).unwrap();
        if predicate.matches(&frame) {
            matched.push(frame.seq());
        }
    }
    assert_eq!(matched, [1, 3]);
    assert_eq!(session.store().stats().inserted, 3);

    let cursor = session.store().open_cursor();
    let frames = session.store().try_dequeue(cursor, 10).unwrap().into_frames();
    assert_eq!(frames[0].timestamp_ns(), 1_000_500_000);
    assert_eq!(frames[1].protocol_path(), "eth → ipv4 → tcp");
}

#[test]
fn test_snaplen_truncated_record() {
    let packet = udp_packet(53, 80, &[0u8; 64]);
    let original_len = packet.len() as u32;
    let mut cut = packet;
    cut.truncate(14 + 20 + 8 + 10);

    let file = capture_file(&[(1, 0, cut, original_len)]);
    let mut reader = CaptureReader::open(file.path()).unwrap();
    let raw = reader.next_frame().unwrap().unwrap();
    assert_eq!(raw.captured_len, 52);
    assert_eq!(raw.original_len, original_len);

    let session = Session::new(Arc::new(default_registry()), SessionConfig::default());
    let frame = session.dissect(raw);
    assert!(frame.is_truncated());

    // The declared lengths reach past the captured bytes.
    let ipv4 = frame.layer("ipv4").unwrap();
    assert!(ipv4.has_error());
    let udp = frame.layer("udp").unwrap();
    assert_eq!(udp.value("udp.src"), Some(&AttrValue::UInt(53)));
    assert_eq!(udp.payload().len, 10);

    assert!(reader.next_frame().unwrap().is_none());
}

#[test]
fn test_partial_final_record_is_end_of_file() {
    let mut file = capture_file(&[full(1, udp_packet(1, 2, b""))]);
    // Record header promising 60 bytes followed by only 5.
    file.write_all(&2u32.to_le_bytes()).unwrap();
    file.write_all(&0u32.to_le_bytes()).unwrap();
    file.write_all(&60u32.to_le_bytes()).unwrap();
    file.write_all(&60u32.to_le_bytes()).unwrap();
    file.write_all(&[0u8; 5]).unwrap();
    file.flush().unwrap();

    let frames = CaptureReader::open(file.path())
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(frames.len(), 1);
}

#[test]
fn test_gzip_capture() {
    let mut plain = Vec::new();
    write_pcap(&mut plain, &[full(1, udp_packet(53, 80, b"")), full(2, udp_packet(80, 53, b""))]).unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(&plain).unwrap();
    let compressed = encoder.finish().unwrap();

    let reader = CaptureReader::new(compressed.as_slice()).unwrap();
    assert_eq!(reader.compression(), Compression::Gzip);
    let seqs: Vec<u64> = reader.map(|r| r.unwrap().seq).collect();
    assert_eq!(seqs, [1, 2]);
}

#[test]
fn test_bad_magic_is_fatal() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"not a capture file at all").unwrap();
    file.flush().unwrap();

    let err = CaptureReader::open(file.path()).err().unwrap();
    assert!(matches!(err, Error::Capture(CaptureError::BadMagic { .. })));
}

#[test]
fn test_missing_file() {
    let err = CaptureReader::open("/nonexistent/capture.pcap").err().unwrap();
    assert!(matches!(err, Error::Capture(CaptureError::FileNotFound { .. })));
}
