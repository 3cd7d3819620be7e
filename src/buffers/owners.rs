//! Multi-owner reference counts

use crate::types::OwnerId;

/// Per-owner reference counts plus their aggregate.
///
/// The aggregate is always the sum of the per-owner counts; entries that
/// drop to zero are removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerTable {
    counts: Vec<(OwnerId, u32)>,
    total: u32,
}

impl OwnerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every reference and record a single one for `owner`
    pub fn reset_to(&mut self, owner: OwnerId) {
        self.counts.clear();
        self.counts.push((owner, 1));
        self.total = 1;
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.total = 0;
    }

    /// Aggregate count
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Count held by one owner
    pub fn count_for(&self, owner: OwnerId) -> u32 {
        self.counts
            .iter()
            .find(|(o, _)| *o == owner)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Owners with their counts, in order of first reference
    pub fn entries(&self) -> &[(OwnerId, u32)] {
        &self.counts
    }

    pub fn increment(&mut self, owner: OwnerId) {
        match self.counts.iter_mut().find(|(o, _)| *o == owner) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((owner, 1)),
        }
        self.total += 1;
    }

    /// Drop one reference, preferably `owner`'s.
    ///
    /// Falls back to an anonymous reference, then to the oldest owner, so
    /// the aggregate stays consistent. Returns the owner actually charged,
    /// or `None` if nothing was held.
    pub fn decrement(&mut self, owner: OwnerId) -> Option<OwnerId> {
        if self.total == 0 {
            return None;
        }

        let index = self
            .position(owner)
            .or_else(|| self.position(OwnerId::UNSPECIFIED))
            .unwrap_or(0);

        let charged = self.counts[index].0;
        self.take_one(index);
        Some(charged)
    }

    /// Move one reference from `from` to `to`.
    ///
    /// With `to` unspecified, an anonymous reference is claimed by `from`.
    /// Returns false if the source holds nothing.
    pub fn transfer(&mut self, from: OwnerId, to: OwnerId) -> bool {
        let (source, target) = if to.is_unspecified() {
            (OwnerId::UNSPECIFIED, from)
        } else {
            (from, to)
        };

        if source == target {
            return self.count_for(source) > 0;
        }

        let Some(index) = self.position(source) else {
            return false;
        };

        self.take_one(index);
        self.increment(target);
        true
    }

    fn position(&self, owner: OwnerId) -> Option<usize> {
        self.counts.iter().position(|(o, _)| *o == owner)
    }

    fn take_one(&mut self, index: usize) {
        self.counts[index].1 -= 1;
        if self.counts[index].1 == 0 {
            self.counts.remove(index);
        }
        self.total -= 1;
    }

    #[cfg(test)]
    fn consistent(&self) -> bool {
        self.counts.iter().map(|(_, c)| *c).sum::<u32>() == self.total
            && self.counts.iter().all(|(_, c)| *c > 0)
    }
}
