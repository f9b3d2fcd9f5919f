//! Second-chance CLOCK.

use super::{PageBits, ReplacementError, ReplacementPolicy, check_candidates};
use crate::{PolicyKind, ResidentPage, WorkingSet};

/// The circular scan pointer shared by the CLOCK family.
///
/// The hand indexes the working set. New pages are inserted just behind it, so a scan
/// starting at the hand visits pages oldest first, and after an eviction the replacement
/// takes the victim's place while the hand moves on to the page after it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hand(usize);

impl Hand {
    pub fn position(self) -> usize {
        self.0
    }

    /// Indices of one full revolution starting at the hand.
    pub fn sweep(self, len: usize) -> impl Iterator<Item = usize> {
        let start = if len == 0 { 0 } else { self.0 % len };
        (0..len).map(move |step| (start + step) % len)
    }

    pub fn point_at(&mut self, index: usize) {
        self.0 = index;
    }

    pub fn inserted(&mut self, index: usize, len: usize) {
        if index <= self.0 {
            self.0 += 1;
        }
        if self.0 >= len {
            self.0 = 0;
        }
    }

    pub fn removed(&mut self, index: usize, len: usize) {
        if index < self.0 {
            self.0 -= 1;
        }
        if self.0 >= len {
            self.0 = 0;
        }
    }
}

/// Evicts the first unreferenced page under the hand, clearing referenced bits it passes.
#[derive(Debug, Default)]
pub(crate) struct Clock {
    hand: Hand,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplacementPolicy for Clock {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Clock
    }

    fn select_victim(
        &mut self,
        set: &WorkingSet,
        bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError> {
        check_candidates(self.kind(), set, eligible)?;

        // The first revolution clears every eligible referenced bit, so the second one
        // always finds a victim.
        for _ in 0..2 {
            for index in self.hand.sweep(set.len()) {
                let Some(page) = set.get(index).filter(|page| eligible(*page)) else {
                    continue;
                };
                if bits.referenced(page) {
                    log::trace!("clock: second chance for {page:?}");
                    bits.clear_referenced(page);
                    continue;
                }
                self.hand.point_at(index);
                return Ok(index);
            }
        }

        Err(ReplacementError::NoEligiblePage(self.kind(), set.len()))
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
