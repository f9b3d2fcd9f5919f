//! Uniform random replacement.

use alloc::vec::Vec;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{PageBits, ReplacementError, ReplacementPolicy, check_candidates};
use crate::{PolicyKind, ResidentPage, WorkingSet};

/// Evicts a page chosen uniformly among the eligible ones. Seeded, so runs are repeatable.
#[derive(Debug)]
pub(crate) struct Random {
    rng: SmallRng,
}

impl Random {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl ReplacementPolicy for Random {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Random
    }

    fn select_victim(
        &mut self,
        set: &WorkingSet,
        _bits: &mut dyn PageBits,
        eligible: &dyn Fn(ResidentPage) -> bool,
    ) -> Result<usize, ReplacementError> {
        check_candidates(self.kind(), set, eligible)?;
        let candidates: Vec<usize> = set
            .iter()
            .enumerate()
            .filter(|(_, page)| eligible(*page))
            .map(|(index, _)| index)
            .collect();
        let pick = self.rng.gen_range(0..candidates.len());
        Ok(candidates[pick])
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn full_set() -> WorkingSet {
        let mut set = WorkingSet::new(8);
        for n in 0..8 {
            set.push(page(n));
        }
        set
    }

    #[test]
    fn same_seed_same_victims() {
        let set = full_set();
        let mut a = Random::new(42);
        let mut b = Random::new(42);
        for _ in 0..16 {
            assert_eq!(
                a.select_victim(&set, &mut Bits::default(), &any),
                b.select_victim(&set, &mut Bits::default(), &any)
            );
        }
    }

    #[test]
    fn covers_every_candidate() {
        let set = full_set();
        let mut policy = Random::new(3);
        let mut seen = [false; 8];
        for _ in 0..512 {
            let index = policy
                .select_victim(&set, &mut Bits::default(), &any)
                .unwrap();
            seen[index] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }
}
