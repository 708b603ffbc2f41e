//! Sequential capture reader over any `Read` source.

use std::fs::File;
use std::io::{self, BufReader, Chain, Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};
use tracing::debug;

use super::{CaptureFormat, Compression};
use crate::error::{CaptureError, Error, Result};
use crate::frame::{RawFrame, LINKTYPE_ETHERNET};

/// Buffer size for pcap_parser readers (256KB).
const BUFFER_SIZE: usize = 262144;

/// Bytes already consumed for detection, replayed in front of the source.
type Replay<R> = Chain<Cursor<Vec<u8>>, R>;

/// Enum dispatch over the supported compressions.
enum Decompress<R: Read> {
    Plain(Replay<R>),
    Gzip(GzDecoder<Replay<R>>),
}

impl<R: Read> Read for Decompress<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompress::Plain(r) => r.read(buf),
            Decompress::Gzip(r) => r.read(buf),
        }
    }
}

/// Reads [`RawFrame`]s from a classic pcap stream.
///
/// The format is detected from the magic number and gzip input is
/// decompressed transparently. A record cut short at the end of the input is
/// discarded and reported as end of file.
pub struct CaptureReader<R: Read> {
    reader: LegacyPcapReader<BufReader<Replay<Decompress<R>>>>,
    format: CaptureFormat,
    compression: Compression,
    link_type: u32,
    seq: u64,
}

impl CaptureReader<File> {
    /// Open a capture file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::Capture(CaptureError::FileNotFound {
                path: path.display().to_string(),
            }),
            _ => Error::Io(e),
        })?;
        Self::new(file)
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(mut source: R) -> Result<Self> {
        let head = read_head(&mut source, 4)?;
        let compression = Compression::detect(&head);
        let replay = Cursor::new(head).chain(source);
        let mut decoded = match compression {
            Compression::None => Decompress::Plain(replay),
            Compression::Gzip => Decompress::Gzip(GzDecoder::new(replay)),
        };

        let magic = read_head(&mut decoded, 4)?;
        let format = CaptureFormat::detect(&magic)?;

        let buffered = BufReader::with_capacity(BUFFER_SIZE, Cursor::new(magic).chain(decoded));
        let reader = LegacyPcapReader::new(BUFFER_SIZE, buffered).map_err(|e| {
            CaptureError::InvalidFormat {
                reason: format!("Failed to parse capture header: {e}"),
            }
        })?;

        debug!(format = %format, compression = %compression, "capture opened");

        Ok(Self {
            reader,
            format,
            compression,
            link_type: LINKTYPE_ETHERNET,
            seq: 0,
        })
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Link type from the file header (e.g., 1 = Ethernet).
    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    /// Frames returned so far.
    pub fn frame_count(&self) -> u64 {
        self.seq
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at end of file, including when the last record is
    /// incomplete.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => match block {
                    PcapBlockOwned::Legacy(packet) => {
                        self.seq += 1;
                        let frame = RawFrame {
                            seq: self.seq,
                            timestamp_ns: self.format.timestamp_ns(packet.ts_sec, packet.ts_usec),
                            link_type: self.link_type,
                            captured_len: packet.caplen,
                            original_len: packet.origlen,
                            data: Bytes::copy_from_slice(packet.data),
                        };

                        self.reader.consume(offset);
                        return Ok(Some(frame));
                    }
                    PcapBlockOwned::LegacyHeader(header) => {
                        self.link_type = header.network.0 as u32;
                        self.reader.consume(offset);
                    }
                    _ => {
                        self.reader.consume(offset);
                    }
                },
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::UnexpectedEof) => {
                    debug!(frames = self.seq, "partial final record discarded");
                    return Ok(None);
                }
                Err(PcapError::Incomplete(_)) => {
                    self.reader.refill().map_err(|e| CaptureError::InvalidFormat {
                        reason: format!("Capture refill error: {e}"),
                    })?;
                }
                Err(e) => {
                    return Err(CaptureError::InvalidFormat {
                        reason: format!("Record {} parse error: {e}", self.seq + 1),
                    }
                    .into());
                }
            }
        }
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Read up to `n` bytes, fewer only at end of input.
fn read_head<R: Read>(source: &mut R, n: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(n);
    source.by_ref().take(n as u64).read_to_end(&mut head)?;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    /// In-memory capture with the given byte order and precision.
    fn capture(big_endian: bool, nano: bool, records: &[(u32, u32, &[u8])]) -> Vec<u8> {
        let u32b = |v: u32| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        let u16b = |v: u16| if big_endian { v.to_be_bytes() } else { v.to_le_bytes() };

        let mut out = Vec::new();
        out.extend(u32b(if nano { 0xa1b23c4d } else { 0xa1b2c3d4 }));
        out.extend(u16b(2));
        out.extend(u16b(4));
        out.extend(u32b(0)); // thiszone
        out.extend(u32b(0)); // sigfigs
        out.extend(u32b(65535));
        out.extend(u32b(1));
        for (sec, frac, data) in records {
            out.extend(u32b(*sec));
            out.extend(u32b(*frac));
            out.extend(u32b(data.len() as u32));
            out.extend(u32b(data.len() as u32));
            out.extend_from_slice(data);
        }
        out
    }

    fn read_all<R: Read>(reader: CaptureReader<R>) -> Vec<RawFrame> {
        reader.map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_reads_all_variants() {
        for (big_endian, nano) in [(false, false), (true, false), (false, true), (true, true)] {
            let bytes = capture(big_endian, nano, &[(1, 500, b"abcd"), (2, 0, b"ef")]);
            let reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
            assert_eq!(reader.format().is_big_endian(), big_endian);
            assert_eq!(reader.format().is_nanosecond(), nano);

            let frames = read_all(reader);
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0].seq, 1);
            assert_eq!(frames[0].data.as_ref(), b"abcd");
            assert_eq!(frames[0].link_type, LINKTYPE_ETHERNET);
            let expected = if nano { 1_000_000_500 } else { 1_000_500_000 };
            assert_eq!(frames[0].timestamp_ns, expected);
            assert_eq!(frames[1].timestamp_ns, 2_000_000_000);
        }
    }

    #[test]
    fn test_partial_final_record_is_end_of_file() {
        let mut bytes = capture(false, false, &[(1, 0, b"abcd"), (2, 0, b"efgh")]);
        // Header of a third record and half its payload.
        bytes.extend(3u32.to_le_bytes());
        bytes.extend(0u32.to_le_bytes());
        bytes.extend(8u32.to_le_bytes());
        bytes.extend(8u32.to_le_bytes());
        bytes.extend_from_slice(b"ijkl");

        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.next_frame().unwrap().is_some());
        assert!(reader.next_frame().unwrap().is_some());
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.frame_count(), 2);
    }

    #[test]
    fn test_gzip_input() {
        let plain = capture(false, false, &[(1, 0, b"abcd")]);
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&plain).unwrap();
        let gz = encoder.finish().unwrap();

        let reader = CaptureReader::new(Cursor::new(gz)).unwrap();
        assert_eq!(reader.compression(), Compression::Gzip);
        assert_eq!(read_all(reader).len(), 1);
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let err = CaptureReader::new(Cursor::new(vec![0u8; 32])).err().unwrap();
        assert!(matches!(
            err,
            Error::Capture(CaptureError::BadMagic { magic: 0 })
        ));
    }

    #[test]
    fn test_empty_capture() {
        let bytes = capture(false, false, &[]);
        let mut reader = CaptureReader::new(Cursor::new(bytes)).unwrap();
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let err = CaptureReader::open("/nonexistent/capture.pcap").err().unwrap();
        assert!(matches!(
            err,
            Error::Capture(CaptureError::FileNotFound { .. })
        ));
    }
}
