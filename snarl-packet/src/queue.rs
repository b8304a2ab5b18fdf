use std::collections::{vec_deque, VecDeque};

use crate::Packet;

/// The shared FIFO of packet records moving between capture, the module
/// chain and re-injection.
///
/// The queue is owned by the engine and lent (`&mut`) to one module at a
/// time for the duration of its `process` call, so it needs no locking.
/// Insertion order is preserved for records a module does not explicitly
/// reorder.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn push_back(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }

    pub fn pop_front(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn front(&self) -> Option<&Packet> {
        self.packets.front()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Packet> {
        self.packets.iter()
    }

    pub fn iter_mut(&mut self) -> vec_deque::IterMut<'_, Packet> {
        self.packets.iter_mut()
    }

    /// Keeps only the records for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&Packet) -> bool) {
        self.packets.retain(keep);
    }

    /// Mutable variant of [`retain`](Self::retain).
    pub fn retain_mut(&mut self, keep: impl FnMut(&mut Packet) -> bool) {
        self.packets.retain_mut(keep);
    }

    /// Removes every record matching `take` and returns them in their
    /// original relative order. The records left behind keep theirs too.
    ///
    /// This is the splice primitive modules use to move records into a
    /// private hold-list without copying payload bytes.
    pub fn drain_where(&mut self, mut take: impl FnMut(&Packet) -> bool) -> Vec<Packet> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.packets.len());

        for packet in self.packets.drain(..) {
            if take(&packet) {
                taken.push(packet);
            } else {
                kept.push_back(packet);
            }
        }

        self.packets = kept;
        taken
    }

    /// Appends records at the tail, preserving their order.
    pub fn append(&mut self, packets: impl IntoIterator<Item = Packet>) {
        self.packets.extend(packets);
    }

    /// Removes and returns the first `n` records.
    ///
    /// # Panics
    /// Panics if `n > self.len()`.
    pub fn drain_front(&mut self, n: usize) -> vec_deque::Drain<'_, Packet> {
        self.packets.drain(..n)
    }

    /// Replaces the queue contents with an empty sequence, returning the old
    /// records. Used by modules that rebuild the queue in place (Duplicate).
    pub fn take(&mut self) -> VecDeque<Packet> {
        std::mem::take(&mut self.packets)
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

impl Extend<Packet> for PacketQueue {
    fn extend<T: IntoIterator<Item = Packet>>(&mut self, iter: T) {
        self.packets.extend(iter);
    }
}

impl FromIterator<Packet> for PacketQueue {
    fn from_iter<T: IntoIterator<Item = Packet>>(iter: T) -> Self {
        Self { packets: VecDeque::from_iter(iter) }
    }
}
