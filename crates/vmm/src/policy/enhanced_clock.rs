//! Enhanced CLOCK, which also weighs the dirty bit.

use super::clock::Hand;
use super::{PageBits, ReplacementError, ReplacementPolicy, check_candidates};
use crate::{PolicyKind, ResidentPage, WorkingSet};

/// Prefers victims that cost no write-back.
///
/// Each pass sweeps one revolution from the hand. An unreferenced clean page is taken
/// immediately. Referenced pages lose their bit and are skipped. The first unreferenced
/// dirty page is remembered and taken when the pass ends without a clean victim. A second
/// pass only runs when the first found nothing but referenced pages.
///
/// An unreferenced dirty page therefore beats a page that was referenced until this pass
/// cleared it, even though the dirty page costs a write-back.
#[derive(Debug, Default)]
pub(crate) struct EnhancedClock {
    hand: Hand,
}

impl EnhancedClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn pass(
        &self,
        set: &WorkingSet,
        bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Option<usize> {
        let mut deferred = None;
        for index in self.hand.sweep(set.len()) {
            let Some(page) = set.get(index).filter(|page| eligible(*page)) else {
                continue;
            };
            if bits.referenced(page) {
                bits.clear_referenced(page);
            } else if !bits.dirty(page) {
                return Some(index);
            } else if deferred.is_none() {
                log::trace!("enhanced clock: deferring dirty {page:?}");
                deferred = Some(index);
            }
        }
        deferred
    }
}

impl ReplacementPolicy for EnhancedClock {
    fn kind(&self) -> PolicyKind {
        PolicyKind::EnhancedClock
    }

    fn select_victim(
        &mut self,
        set: &WorkingSet,
        bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError> {
        check_candidates(self.kind(), set, eligible)?;

        let victim = match self.pass(set, bits, eligible) {
            Some(index) => Some(index),
            None => self.pass(set, bits, eligible),
        };
        let index = victim.ok_or(ReplacementError::NoEligiblePage(self.kind(), set.len()))?;
        self.hand.point_at(index);
        Ok(index)
    }

    fn placement(&self, set: &WorkingSet) -> usize {
        self.hand.position().min(set.len())
    }

    fn page_inserted(&mut self, index: usize, len: usize) {
        self.hand.inserted(index, len);
    }

    fn page_removed(&mut self, index: usize, _page: ResidentPage, len: usize) {
        self.hand.removed(index, len);
    }
}
