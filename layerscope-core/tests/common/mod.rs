//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::io::Write;

use layerscope_core::RawFrame;

pub const SECOND: u64 = 1_000_000_000;

/// Ethernet header (14 bytes) carrying IPv4.
fn ethernet(packet: &mut Vec<u8>) {
    packet.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]); // dst MAC
    packet.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]); // src MAC
    packet.extend_from_slice(&[0x08, 0x00]); // ethertype: IPv4
}

/// IPv4 header (20 bytes) with a valid checksum.
fn ipv4(packet: &mut Vec<u8>, proto: u8, src: [u8; 4], dst: [u8; 4], payload_len: usize) {
    let start = packet.len();
    let total = (20 + payload_len) as u16;
    packet.push(0x45); // Version 4, IHL 5
    packet.push(0x00);
    packet.extend_from_slice(&total.to_be_bytes());
    packet.extend_from_slice(&[0x12, 0x34]); // Identification
    packet.extend_from_slice(&[0x40, 0x00]); // Don't fragment
    packet.push(0x40); // TTL: 64
    packet.push(proto);
    packet.extend_from_slice(&[0x00, 0x00]); // Checksum, filled below
    packet.extend_from_slice(&src);
    packet.extend_from_slice(&dst);

    let mut sum: u32 = packet[start..]
        .chunks(2)
        .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    packet[start + 10..start + 12].copy_from_slice(&(!(sum as u16)).to_be_bytes());
}

/// Ethernet/IPv4/UDP frame from 10.0.0.1 to 10.0.0.2.
pub fn udp_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    ethernet(&mut packet);
    ipv4(&mut packet, 17, [10, 0, 0, 1], [10, 0, 0, 2], 8 + payload.len());

    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00]); // Checksum
    packet.extend_from_slice(payload);
    packet
}

/// Ethernet/IPv4/TCP frame with PSH+ACK from 192.168.1.100 to 192.168.1.200.
pub fn tcp_packet(src_port: u16, dst_port: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
    tcp_segment(src_port, dst_port, seq, 0x18, payload)
}

/// Like [`tcp_packet`] with explicit flag bits (0x02 is SYN).
pub fn tcp_segment(src_port: u16, dst_port: u16, seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    ethernet(&mut packet);
    ipv4(&mut packet, 6, [192, 168, 1, 100], [192, 168, 1, 200], 20 + payload.len());

    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // Ack
    packet.push(0x50); // Data offset: 5 (20 bytes)
    packet.push(flags);
    packet.extend_from_slice(&[0xff, 0xff]); // Window: 65535
    packet.extend_from_slice(&[0x00, 0x00]); // Checksum
    packet.extend_from_slice(&[0x00, 0x00]); // Urgent pointer
    packet.extend_from_slice(payload);
    packet
}

pub fn raw(seq: u64, timestamp_ns: u64, data: Vec<u8>) -> RawFrame {
    RawFrame::ethernet(seq, timestamp_ns, data)
}

/// Little-endian microsecond pcap file. Each record is
/// `(ts_sec, ts_usec, data, original_len)`.
pub fn write_pcap<W: Write>(out: &mut W, records: &[(u32, u32, Vec<u8>, u32)]) -> std::io::Result<()> {
    out.write_all(&0xa1b2c3d4u32.to_le_bytes())?;
    out.write_all(&2u16.to_le_bytes())?; // version major
    out.write_all(&4u16.to_le_bytes())?; // version minor
    out.write_all(&0i32.to_le_bytes())?; // thiszone
    out.write_all(&0u32.to_le_bytes())?; // sigfigs
    out.write_all(&65535u32.to_le_bytes())?; // snaplen
    out.write_all(&1u32.to_le_bytes())?; // Ethernet
    for (sec, usec, data, original_len) in records {
        out.write_all(&sec.to_le_bytes())?;
        out.write_all(&usec.to_le_bytes())?;
        out.write_all(&(data.len() as u32).to_le_bytes())?;
        out.write_all(&original_len.to_le_bytes())?;
        out.write_all(data)?;
    }
    Ok(())
}
