//! Reorder buffer for packets that arrive ahead of their turn

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use crate::packet::Packet;

/// Min-heap of received packets keyed by sequence number
///
/// A message is only released once every one of its fragments is present,
/// so partially received messages never reach the application.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    heap: BinaryHeap<Reverse<Packet>>,
    seqnums: HashSet<u32>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a packet unless one with the same sequence number is already held
    pub fn push(&mut self, packet: Packet) {
        if self.seqnums.insert(packet.sequence_number()) {
            self.heap.push(Reverse(packet));
        }
    }

    pub fn contains(&self, sequence_number: u32) -> bool {
        self.seqnums.contains(&sequence_number)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Sequence number of the lowest buffered packet
    pub fn peek_min(&self) -> Option<u32> {
        self.heap.peek().map(|Reverse(p)| p.sequence_number())
    }

    /// Drops every packet numbered below `sequence_number`, returning how many went
    pub fn discard_below(&mut self, sequence_number: u32) -> usize {
        let mut discarded = 0;
        while self.peek_min().is_some_and(|min| min < sequence_number) {
            if let Some(Reverse(packet)) = self.heap.pop() {
                self.seqnums.remove(&packet.sequence_number());
                discarded += 1;
            }
        }
        discarded
    }

    /// Pops the lowest packet together with all its fragments
    ///
    /// Returns `None`, leaving the buffer untouched, unless every fragment
    /// `min.seq ..= min.seq + min.more_fragments` is present. Fragments are
    /// returned in increasing sequence order.
    pub fn pop_min_and_all_fragments(&mut self) -> Option<Vec<Packet>> {
        let Reverse(min) = self.heap.peek()?;
        let first = min.sequence_number();
        let count = usize::try_from(min.more_fragments()).ok()?.checked_add(1)?;

        // Cannot be complete if the buffer holds fewer packets than the message needs
        if count > self.heap.len() {
            return None;
        }
        let last = first.checked_add(min.more_fragments())?;
        if !(first..=last).all(|seq| self.seqnums.contains(&seq)) {
            return None;
        }

        // The fragments are consecutive, so they are exactly the next `count` minima
        let mut fragments = Vec::with_capacity(count);
        for _ in 0..count {
            let Reverse(packet) = self.heap.pop()?;
            self.seqnums.remove(&packet.sequence_number());
            fragments.push(packet);
        }
        Some(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    fn packet(seq: u32, more_fragments: u32) -> Packet {
        Packet::new(
            seq,
            Address::new("123.45.67.89", 12345),
            Address::new("213.54.76.98", 54321),
        )
        .with_more_fragments(more_fragments)
        .with_payload(seq.to_be_bytes().to_vec())
    }

    fn seqs(packets: &[Packet]) -> Vec<u32> {
        packets.iter().map(Packet::sequence_number).collect()
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer = ReorderBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.peek_min(), None);
        assert!(buffer.pop_min_and_all_fragments().is_none());
    }

    #[test]
    fn test_push_deduplicates() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(packet(3, 0));
        buffer.push(packet(3, 0));
        buffer.push(packet(1, 0));

        assert_eq!(buffer.len(), 2);
        assert!(buffer.contains(1));
        assert!(buffer.contains(3));
        assert!(!buffer.contains(2));
        assert_eq!(buffer.peek_min(), Some(1));
    }

    #[test]
    fn test_pops_in_sequence_order() {
        let mut buffer = ReorderBuffer::new();
        for seq in [5, 2, 9, 1] {
            buffer.push(packet(seq, 0));
        }

        let mut popped = Vec::new();
        while let Some(fragments) = buffer.pop_min_and_all_fragments() {
            popped.extend(seqs(&fragments));
        }
        assert_eq!(popped, vec![1, 2, 5, 9]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_incomplete_message_is_not_released() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(packet(10, 2));
        buffer.push(packet(12, 0));

        assert!(buffer.pop_min_and_all_fragments().is_none());
        assert_eq!(buffer.len(), 2);
        assert!(buffer.contains(10));
        assert!(buffer.contains(12));

        buffer.push(packet(11, 1));
        let fragments = buffer.pop_min_and_all_fragments().unwrap();
        assert_eq!(seqs(&fragments), vec![10, 11, 12]);
        assert!(buffer.is_empty());
        assert!(!buffer.contains(11));
    }

    #[test]
    fn test_only_the_minimum_message_is_popped() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(packet(0, 1));
        buffer.push(packet(1, 0));
        buffer.push(packet(2, 0));

        let fragments = buffer.pop_min_and_all_fragments().unwrap();
        assert_eq!(seqs(&fragments), vec![0, 1]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.peek_min(), Some(2));
    }

    #[test]
    fn test_oversized_fragment_count_never_completes() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(packet(u32::MAX - 1, 5));
        buffer.push(packet(u32::MAX, 0));

        assert!(buffer.pop_min_and_all_fragments().is_none());

        let mut huge = ReorderBuffer::new();
        huge.push(packet(0, u32::MAX));
        assert!(huge.pop_min_and_all_fragments().is_none());
        assert_eq!(huge.len(), 1);
    }

    #[test]
    fn test_out_of_order_fragments_reassemble() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(packet(100, 2));
        assert!(buffer.pop_min_and_all_fragments().is_none());
        buffer.push(packet(102, 0));
        assert!(buffer.pop_min_and_all_fragments().is_none());
        buffer.push(packet(101, 1));

        let fragments = buffer.pop_min_and_all_fragments().unwrap();
        let payload: Vec<u8> = fragments
            .iter()
            .flat_map(|p| p.payload().to_vec())
            .collect();
        let expected: Vec<u8> = [100u32, 101, 102]
            .iter()
            .flat_map(|s| s.to_be_bytes())
            .collect();
        assert_eq!(payload, expected);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_discard_below() {
        let mut buffer = ReorderBuffer::new();
        for seq in [7, 3, 5, 9] {
            buffer.push(packet(seq, 0));
        }

        assert_eq!(buffer.discard_below(6), 2);
        assert_eq!(buffer.len(), 2);
        assert!(!buffer.contains(3));
        assert!(!buffer.contains(5));
        assert_eq!(buffer.peek_min(), Some(7));

        assert_eq!(buffer.discard_below(7), 0);
        assert_eq!(buffer.discard_below(100), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_last_fragment_alone_is_a_complete_message() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(packet(102, 0));

        let fragments = buffer.pop_min_and_all_fragments().unwrap();
        assert_eq!(seqs(&fragments), vec![102]);
        assert!(buffer.is_empty());
    }
}
