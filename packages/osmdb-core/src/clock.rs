use std::collections::BTreeMap;

use crate::ids::{Seq, WriterKey};

/// Snapshot of how many entries of every writer feed were visible when an entry was written.
///
/// The writer's own feed is counted *including* the entry itself, so an entry with sequence
/// number `s` carries `clock[writer] == s + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CausalClock {
    lengths: BTreeMap<WriterKey, u64>,
}

impl CausalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries of `writer` this clock has seen.
    pub fn get(&self, writer: &WriterKey) -> u64 {
        self.lengths.get(writer).copied().unwrap_or(0)
    }

    pub fn set(&mut self, writer: WriterKey, length: u64) {
        if length == 0 {
            self.lengths.remove(&writer);
        } else {
            self.lengths.insert(writer, length);
        }
    }

    /// Raise the known length of a feed; never lowers it.
    pub fn observe(&mut self, writer: WriterKey, length: u64) {
        let current = self.get(&writer);
        if length > current {
            self.lengths.insert(writer, length);
        }
    }

    pub fn merge(&mut self, other: &CausalClock) {
        for (writer, &length) in &other.lengths {
            self.observe(*writer, length);
        }
    }

    /// Whether entry `(writer, seq)` lies in this clock's causal past (or is the entry itself).
    pub fn covers(&self, writer: &WriterKey, seq: Seq) -> bool {
        seq < self.get(writer)
    }

    /// Step one feed back by a single entry. Returns `false` if the feed was already at genesis.
    pub fn rewind(&mut self, writer: &WriterKey) -> bool {
        match self.get(writer) {
            0 => false,
            length => {
                self.set(*writer, length - 1);
                true
            }
        }
    }

    /// No entries of any feed are visible.
    pub fn is_genesis(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn is_aware_of(&self, other: &CausalClock) -> bool {
        other
            .lengths
            .iter()
            .all(|(writer, &length)| self.get(writer) >= length)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&WriterKey, &u64)> {
        self.lengths.iter()
    }
}
