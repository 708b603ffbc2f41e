//! Capture file import.
//!
//! Classic pcap files in all four byte-order/precision variants, optionally
//! gzip-compressed. The main types are:
//! - [`CaptureFormat`] - Variant detected from the magic number
//! - [`CaptureReader`] - Sequential reader producing [`RawFrame`](crate::frame::RawFrame)s

mod reader;

use std::fmt;

use crate::error::CaptureError;

pub use reader::CaptureReader;

/// Pcap variant, identified by the first four bytes of the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureFormat {
    /// Little-endian, microsecond timestamps
    LegacyLeMicro,
    /// Big-endian, microsecond timestamps
    LegacyBeMicro,
    /// Little-endian, nanosecond timestamps
    LegacyLeNano,
    /// Big-endian, nanosecond timestamps
    LegacyBeNano,
}

impl CaptureFormat {
    /// Detect the variant from magic bytes.
    pub fn detect(data: &[u8]) -> Result<Self, CaptureError> {
        let Some(head) = data.get(..4) else {
            return Err(CaptureError::InvalidFormat {
                reason: "Data too small for capture magic".into(),
            });
        };

        let magic = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        match magic {
            0xa1b2c3d4 => Ok(CaptureFormat::LegacyLeMicro),
            0xd4c3b2a1 => Ok(CaptureFormat::LegacyBeMicro),
            0xa1b23c4d => Ok(CaptureFormat::LegacyLeNano),
            0x4d3cb2a1 => Ok(CaptureFormat::LegacyBeNano),
            0x0a0d0d0a => Err(CaptureError::Unsupported { format: "pcapng" }),
            magic => Err(CaptureError::BadMagic { magic }),
        }
    }

    pub fn is_nanosecond(&self) -> bool {
        matches!(self, CaptureFormat::LegacyLeNano | CaptureFormat::LegacyBeNano)
    }

    pub fn is_big_endian(&self) -> bool {
        matches!(self, CaptureFormat::LegacyBeMicro | CaptureFormat::LegacyBeNano)
    }

    /// Capture timestamp in nanoseconds since the epoch.
    pub fn timestamp_ns(&self, ts_sec: u32, ts_frac: u32) -> u64 {
        let frac = if self.is_nanosecond() {
            u64::from(ts_frac)
        } else {
            u64::from(ts_frac) * 1_000
        };
        u64::from(ts_sec) * 1_000_000_000 + frac
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureFormat::LegacyLeMicro => "pcap (le, usec)",
            CaptureFormat::LegacyBeMicro => "pcap (be, usec)",
            CaptureFormat::LegacyLeNano => "pcap (le, nsec)",
            CaptureFormat::LegacyBeNano => "pcap (be, nsec)",
        };
        f.write_str(name)
    }
}

/// Compression wrapped around a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    /// Gzip (.gz)
    Gzip,
}

impl Compression {
    /// Detect compression format from magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [0x1f, 0x8b, ..] => Compression::Gzip,
            _ => Compression::None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, Compression::None)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_all_variants() {
        let cases = [
            ([0xd4, 0xc3, 0xb2, 0xa1], CaptureFormat::LegacyLeMicro),
            ([0xa1, 0xb2, 0xc3, 0xd4], CaptureFormat::LegacyBeMicro),
            ([0x4d, 0x3c, 0xb2, 0xa1], CaptureFormat::LegacyLeNano),
            ([0xa1, 0xb2, 0x3c, 0x4d], CaptureFormat::LegacyBeNano),
        ];
        for (bytes, expected) in cases {
            assert_eq!(CaptureFormat::detect(&bytes).unwrap(), expected);
        }
    }

    #[test]
    fn test_detect_rejects_pcapng_and_garbage() {
        assert!(matches!(
            CaptureFormat::detect(&[0x0a, 0x0d, 0x0d, 0x0a]),
            Err(CaptureError::Unsupported { format: "pcapng" })
        ));
        assert!(matches!(
            CaptureFormat::detect(&[0xde, 0xad, 0xbe, 0xef]),
            Err(CaptureError::BadMagic { magic: 0xefbeadde })
        ));
        assert!(matches!(
            CaptureFormat::detect(&[0xd4, 0xc3]),
            Err(CaptureError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_timestamp_normalization() {
        assert_eq!(CaptureFormat::LegacyLeMicro.timestamp_ns(2, 500), 2_000_500_000);
        assert_eq!(CaptureFormat::LegacyBeNano.timestamp_ns(2, 500), 2_000_000_500);
    }

    #[test]
    fn test_compression_detect() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
        assert_eq!(Compression::detect(&[0xd4, 0xc3]), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }
}
