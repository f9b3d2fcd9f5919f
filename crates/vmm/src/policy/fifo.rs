//! First in, first out.

use super::{PageBits, ReplacementError, ReplacementPolicy, check_candidates};
use crate::{PolicyKind, ResidentPage, WorkingSet};

/// Evicts the page that has been resident longest. New pages join the tail, so the head of
/// the working set is always the oldest.
#[derive(Debug, Default)]
pub(crate) struct Fifo;

impl ReplacementPolicy for Fifo {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Fifo
    }

    fn select_victim(
        &mut self,
        set: &WorkingSet,
        _bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError> {
        check_candidates(self.kind(), set, eligible)?;
        set.iter()
            .position(eligible)
            .ok_or(ReplacementError::NoEligiblePage(self.kind(), set.len()))
    }
}
