//! Last in, first out.

use super::{PageBits, ReplacementError, ReplacementPolicy, check_candidates};
use crate::{PolicyKind, ResidentPage, WorkingSet};

/// Evicts the most recently loaded page, treating the working set as a stack.
#[derive(Debug, Default)]
pub(crate) struct Lifo;

impl ReplacementPolicy for Lifo {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lifo
    }

    fn select_victim(
        &mut self,
        set: &WorkingSet,
        _bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError> {
        check_candidates(self.kind(), set, eligible)?;
        (0..set.len())
            .rev()
            .find(|&index| set.get(index).is_some_and(eligible))
            .ok_or(ReplacementError::NoEligiblePage(self.kind(), set.len()))
    }
}
