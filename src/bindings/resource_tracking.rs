// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-resource content tracking.
//!
//! # Overview
//!
//! Two pieces of bookkeeping decide whether a resource's memory must be preserved, reloaded or
//! can be thrown away:
//! - [`LevelMask`]: which mip levels hold defined content
//! - [`TransferTracker`]: how many CPU mappings are outstanding
//!
//! Neither is synchronized. A resource is owned by one context at a time and its accesses are
//! serialized by that context; GPU concurrency is handled by waiting on BOs, not by locking
//! these structures.

use bitvec::prelude::{BitVec, Lsb0};

/// One bit per mip level: has the level ever been written with defined content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMask {
    bits: BitVec<u32, Lsb0>,
}

impl LevelMask {
    /// All `levels` invalid.
    pub fn new(levels: u32) -> Self {
        LevelMask {
            bits: BitVec::repeat(false, levels as usize),
        }
    }

    pub fn len(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn set(&mut self, level: u32) {
        self.bits.set(level as usize, true);
    }

    pub fn clear(&mut self, level: u32) {
        self.bits.set(level as usize, false);
    }

    pub fn test(&self, level: u32) -> bool {
        self.bits
            .get(level as usize)
            .is_some_and(|bit| *bit)
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    /// Whether every level is valid.
    pub fn all(&self) -> bool {
        self.bits.all()
    }

    /// Whether any level is valid.
    pub fn any(&self) -> bool {
        self.bits.any()
    }

    /// Valid level indices, ascending.
    pub fn iter_valid(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter_ones().map(|level| level as u32)
    }
}

/// Counts CPU mappings that have begun but not ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferTracker {
    outstanding: u32,
}

impl TransferTracker {
    pub fn begin(&mut self) {
        self.outstanding += 1;
    }

    pub fn end(&mut self) {
        debug_assert!(self.outstanding > 0, "transfer ended twice");
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn is_mapped(&self) -> bool {
        self.outstanding > 0
    }
}
