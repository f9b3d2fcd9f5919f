//! Page replacement strategies.
//!
//! A strategy picks a victim from the [`WorkingSet`] and decides where newly loaded pages are
//! inserted into it. The working set itself is owned by the
//! [`VirtualMemory`](crate::VirtualMemory) context, which tells the strategy about every
//! insertion, removal and access so that position-dependent state (the CLOCK hand, LRU
//! stamps) stays in step with the table.
//!
//! Strategies only ever see the pages the caller marks as eligible. Among equally good
//! candidates the one earliest in the strategy's scan order wins.

mod clock;
mod enhanced_clock;
mod fifo;
mod lifo;
mod lru;
mod random;

use alloc::boxed::Box;

use thiserror::Error;

use crate::{PolicyKind, ResidentPage, WorkingSet};

pub(crate) use clock::Clock;
pub(crate) use enhanced_clock::EnhancedClock;
pub(crate) use fifo::Fifo;
pub(crate) use lifo::Lifo;
pub(crate) use lru::Lru;
pub(crate) use random::Random;

/// Errors produced by a replacement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplacementError {
    /// The working set holds no pages at all.
    #[error("{0} has no resident pages to choose from")]
    EmptyWorkingSet(PolicyKind),
    /// Pages are resident but none may be evicted.
    #[error("{0} found no evictable page among {1} resident")]
    NoEligiblePage(PolicyKind, usize),
}

/// Access to the status bits of resident pages.
pub trait PageBits {
    /// Returns true if the page was accessed since its bit was last cleared.
    fn referenced(&self, page: ResidentPage) -> bool;

    /// Returns true if the page was written since it was loaded.
    fn dirty(&self, page: ResidentPage) -> bool;

    /// Clears the page's referenced bit.
    fn clear_referenced(&mut self, page: ResidentPage);
}

/// A victim-selection strategy.
pub trait ReplacementPolicy {
    /// Returns which strategy this is.
    fn kind(&self) -> PolicyKind;

    /// Picks the page to evict and returns its index in `set`.
    ///
    /// Only pages for which `eligible` returns true may be chosen. CLOCK-family strategies
    /// clear referenced bits through `bits` while scanning.
    fn select_victim(
        &mut self,
        set: &WorkingSet,
        bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError>;

    /// Returns the index at which the next loaded page is inserted.
    fn placement(&self, set: &WorkingSet) -> usize {
        set.len()
    }

    /// Called after a page was inserted at `index`; the set now holds `len` pages.
    fn page_inserted(&mut self, _index: usize, _len: usize) {}

    /// Called after `page` was removed from `index`; the set now holds `len` pages.
    fn page_removed(&mut self, _index: usize, _page: ResidentPage, _len: usize) {}

    /// Called whenever a resident page is loaded or accessed.
    fn page_accessed(&mut self, _page: ResidentPage) {}
}

/// Creates the strategy named by `kind`. `seed` drives RANDOM and is ignored by the rest.
pub(crate) fn build(kind: PolicyKind, seed: u64) -> Box<dyn ReplacementPolicy> {
    match kind {
        PolicyKind::Fifo => Box::new(Fifo),
        PolicyKind::Lifo => Box::new(Lifo),
        PolicyKind::Random => Box::new(Random::new(seed)),
        PolicyKind::Clock => Box::new(Clock::new()),
        PolicyKind::EnhancedClock => Box::new(EnhancedClock::new()),
        PolicyKind::Lru => Box::new(Lru::new()),
    }
}

/// Fails with the right error when `set` has nothing to offer.
fn check_candidates(
    kind: PolicyKind,
    set: &WorkingSet,
    eligible: &dyn Fn(ResidentPage) -> bool,
) -> Result<(), ReplacementError> {
    if set.is_empty() {
        return Err(ReplacementError::EmptyWorkingSet(kind));
    }
    if !set.iter().any(eligible) {
        return Err(ReplacementError::NoEligiblePage(kind, set.len()));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn builds_every_kind() {
        for kind in PolicyKind::ALL {
            assert_eq!(build(kind, 1).kind(), kind);
        }
    }

    #[test]
    fn every_kind_rejects_an_empty_set() {
        let set = WorkingSet::new(4);
        for kind in PolicyKind::ALL {
            let mut policy = build(kind, 1);
            assert_eq!(
                policy.select_victim(&set, &mut Bits::default(), &any),
                Err(ReplacementError::EmptyWorkingSet(kind))
            );
        }
    }

    #[test]
    fn every_kind_respects_eligibility() {
        for kind in PolicyKind::ALL {
            let mut policy = build(kind, 7);
            let mut set = WorkingSet::new(4);
            for n in 0..4 {
                load(policy.as_mut(), &mut set, page(n));
            }

            let only_two = |candidate: ResidentPage| candidate == page(2);
            let index = policy
                .select_victim(&set, &mut Bits::default(), &only_two)
                .unwrap();
            assert_eq!(set.get(index), Some(page(2)), "{kind}");

            let none = |_: ResidentPage| false;
            assert_eq!(
                policy.select_victim(&set, &mut Bits::default(), &none),
                Err(ReplacementError::NoEligiblePage(kind, 4))
            );
        }
    }
}
