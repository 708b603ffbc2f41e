//! Ordering of sequenced segments into a contiguous stream.
//!
//! Sequence numbers are 32-bit and wrap (TCP style). Out-of-order segments
//! wait in a `BTreeMap` until the gap before them is filled; retransmitted
//! bytes are trimmed. Unsequenced streams append in arrival order.
//!
//! Map order is raw `u32` order, which differs from sequence order once
//! pending segments straddle the wrap, so the next segment is always picked
//! by its distance from the expected sequence number.

use std::collections::BTreeMap;

use tracing::debug;

use super::StreamBuffer;

/// A hole in the sequence space that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub start_seq: u32,
    pub end_seq: u32,
}

/// Per-stream segment ordering state.
#[derive(Debug)]
pub struct Reassembler {
    /// Next expected sequence number, once known.
    expected_seq: Option<u32>,
    /// Out-of-order segments keyed by sequence number.
    pending: BTreeMap<u32, Vec<u8>>,
    max_pending: usize,
    gaps: Vec<SequenceGap>,
    pub segment_count: u32,
    pub retransmit_count: u32,
    pub out_of_order_count: u32,
}

impl Reassembler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            expected_seq: None,
            pending: BTreeMap::new(),
            max_pending,
            gaps: Vec::new(),
            segment_count: 0,
            retransmit_count: 0,
            out_of_order_count: 0,
        }
    }

    /// Accept one segment and append whatever becomes contiguous to `out`.
    ///
    /// Returns the number of bytes appended.
    /// An empty sequenced segment (a SYN, a bare ACK) only fixes the
    /// starting point if none is known yet.
    pub fn push(&mut self, seq: Option<u32>, data: &[u8], out: &mut StreamBuffer) -> usize {
        if data.is_empty() {
            if let Some(seq) = seq {
                self.anchor(seq);
            }
            return 0;
        }
        self.segment_count += 1;

        let Some(seq) = seq else {
            return out.append(data);
        };

        // First segment fixes the starting point.
        let expected = *self.expected_seq.get_or_insert(seq);
        let seg_end = seq_add(seq, data.len());

        if seq_lt(seq, expected) {
            if seq_le(seg_end, expected) {
                self.retransmit_count += 1;
                return 0;
            }
            // Partial overlap, keep only the new tail.
            let overlap = expected.wrapping_sub(seq) as usize;
            return self.push_in_order(expected, &data[overlap..], out);
        }

        if seq == expected {
            return self.push_in_order(seq, data, out);
        }

        self.out_of_order_count += 1;
        self.pending.entry(seq).or_insert_with(|| data.to_vec());

        if self.pending.len() > self.max_pending {
            return self.skip_gap(out);
        }
        0
    }

    /// Set the sequence number of the first stream byte unless data has
    /// already fixed it.
    pub fn anchor(&mut self, seq: u32) {
        self.expected_seq.get_or_insert(seq);
    }

    pub fn is_anchored(&self) -> bool {
        self.expected_seq.is_some()
    }

    /// Pending segment closest to `expected` in sequence order. Segments
    /// behind `expected` come first.
    fn next_pending(&self, expected: u32) -> Option<u32> {
        self.pending
            .keys()
            .copied()
            .min_by_key(|seq| seq.wrapping_sub(expected) as i32)
    }

    /// Fast path: `data` starts exactly at the expected sequence number.
    fn push_in_order(&mut self, seq: u32, data: &[u8], out: &mut StreamBuffer) -> usize {
        let written = out.append(data);
        self.expected_seq = Some(seq_add(seq, data.len()));
        written + self.flush_pending(out)
    }

    /// Append pending segments that are now in order.
    fn flush_pending(&mut self, out: &mut StreamBuffer) -> usize {
        let mut written = 0;
        while let Some(expected) = self.expected_seq {
            let Some(seq) = self.next_pending(expected) else {
                break;
            };
            if seq_lt(expected, seq) {
                break;
            }
            let Some(data) = self.pending.remove(&seq) else {
                break;
            };

            let end = seq_add(seq, data.len());
            if seq_le(end, expected) {
                self.retransmit_count += 1;
                continue;
            }
            let overlap = expected.wrapping_sub(seq) as usize;
            written += out.append(&data[overlap..]);
            self.expected_seq = Some(end);
        }
        written
    }

    /// Give up on the oldest hole so buffered data can flow.
    fn skip_gap(&mut self, out: &mut StreamBuffer) -> usize {
        let Some(expected) = self.expected_seq else {
            return 0;
        };
        let Some(next) = self.next_pending(expected) else {
            return 0;
        };
        debug!(start = expected, end = next, "skipping sequence gap");
        self.gaps.push(SequenceGap {
            start_seq: expected,
            end_seq: next,
        });
        self.expected_seq = Some(next);
        self.flush_pending(out)
    }

    /// Holes that were skipped because too many segments were pending.
    pub fn gaps(&self) -> &[SequenceGap] {
        &self.gaps
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// Sequence number comparison helpers
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

fn seq_add(a: u32, n: usize) -> u32 {
    a.wrapping_add(n as u32)
}
