//! Least recently used.

use alloc::collections::BTreeMap;

use super::{PageBits, ReplacementError, ReplacementPolicy, check_candidates};
use crate::{PolicyKind, ResidentPage, WorkingSet};

/// Evicts the page whose last access is oldest.
///
/// Every load and every successful translation stamps the page with the next value of a
/// counter. Pages that were never stamped count as oldest. Ties go to the page earliest in
/// the working set.
#[derive(Debug, Default)]
pub(crate) struct Lru {
    clock: u64,
    stamps: BTreeMap<ResidentPage, u64>,
}

impl Lru {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, page: ResidentPage) -> u64 {
        self.stamps.get(&page).copied().unwrap_or(0)
    }
}

impl ReplacementPolicy for Lru {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lru
    }

    fn select_victim(
        &mut self,
        set: &WorkingSet,
        _bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError> {
        check_candidates(self.kind(), set, eligible)?;
        set.iter()
            .enumerate()
            .filter(|(_, page)| eligible(*page))
            .min_by_key(|(index, page)| (self.stamp(*page), *index))
            .map(|(index, _)| index)
            .ok_or(ReplacementError::NoEligiblePage(self.kind(), set.len()))
    }

    fn page_removed(&mut self, _index: usize, page: ResidentPage, _len: usize) {
        self.stamps.remove(&page);
    }

    fn page_accessed(&mut self, page: ResidentPage) {
        self.clock += 1;
        self.stamps.insert(page, self.clock);
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn evicts_least_recently_accessed() {
        let mut policy = Lru::new();
        let mut set = WorkingSet::new(3);
        let mut bits = Bits::default();
        for n in 1..=3 {
            load(&mut policy, &mut set, page(n));
        }
        policy.page_accessed(page(1));

        assert_eq!(evict(&mut policy, &mut set, &mut bits), page(2));
        load(&mut policy, &mut set, page(4));
        policy.page_accessed(page(3));
        assert_eq!(evict(&mut policy, &mut set, &mut bits), page(1));
    }

    #[test]
    fn unstamped_pages_go_first_in_table_order() {
        let mut policy = Lru::new();
        let mut set = WorkingSet::new(3);
        let mut bits = Bits::default();
        set.push(page(5));
        set.push(page(6));
        policy.page_accessed(page(5));

        assert_eq!(evict(&mut policy, &mut set, &mut bits), page(6));
    }

    #[test]
    fn forgets_removed_pages() {
        let mut policy = Lru::new();
        let mut set = WorkingSet::new(2);
        let mut bits = Bits::default();
        load(&mut policy, &mut set, page(1));
        evict(&mut policy, &mut set, &mut bits);
        assert!(policy.stamps.is_empty());
    }
}
