//! Simulation-based checking: exhaustive for narrow miters, random
//! sampling otherwise.

use std::rc::Rc;

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::checker::{
    is_counterexample, validate_miter, Checker, CheckerResult, CheckerState, Progress,
};
use crate::celltype::CellTypeRegistry;
use crate::simulator::{assignment, exhaustive_pattern, exhaustive_words, valid_mask, Simulator};
use crate::subnet::Subnet;

/// Widest miter enumerated exhaustively on request.
const MAX_EXHAUSTIVE_INPUTS: usize = 40;

#[derive(Debug, Clone)]
pub struct RndChecker {
    tries: usize,
    exhaustive: bool,
    exhaustive_bound: usize,
    seed: u64,
    registry: Option<Rc<CellTypeRegistry>>,
}

impl Default for RndChecker {
    fn default() -> Self {
        Self {
            tries: 1000,
            exhaustive: false,
            exhaustive_bound: 16,
            seed: 0,
            registry: None,
        }
    }
}

impl RndChecker {
    /// Number of random assignments to try.
    pub fn with_tries(mut self, tries: usize) -> Self {
        self.tries = tries;
        self
    }

    /// Enumerate every assignment regardless of the input count.
    pub fn with_exhaustive(mut self, exhaustive: bool) -> Self {
        self.exhaustive = exhaustive;
        self
    }

    /// Miters with at most this many inputs are always enumerated.
    pub fn with_exhaustive_bound(mut self, bound: usize) -> Self {
        self.exhaustive_bound = bound;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Library whose implementations replace custom cells before checking.
    pub fn with_registry(mut self, registry: Rc<CellTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn random(&self, miter: &Subnet) -> CheckerResult {
        let n_in = miter.in_num();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut sim = Simulator::new(miter);
        let mut left = self.tries;
        while left > 0 {
            let n = left.min(64);
            left -= n;
            let mask = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };
            let inputs: Vec<u64> = (0..n_in).map(|_| rng.gen()).collect();
            sim.simulate(&inputs);
            let diff = sim.output(0) & mask;
            if diff != 0 {
                let bit = diff.trailing_zeros();
                let cex = inputs.iter().map(|w| (w >> bit) & 1 == 1).collect();
                return CheckerResult::not_equal(cex);
            }
        }
        debug!("{} random assignments agree", self.tries);
        CheckerResult::unknown()
    }
}

/// Enumerates every assignment of the miter inputs.
pub(crate) fn simulate_exhaustively(miter: &Subnet) -> CheckerResult {
    let n_in = miter.in_num();
    let mask = valid_mask(n_in);
    let mut sim = Simulator::new(miter);
    for word in 0..exhaustive_words(n_in) {
        let inputs: Vec<u64> = (0..n_in)
            .map(|i| exhaustive_pattern(n_in, i, word))
            .collect();
        sim.simulate(&inputs);
        let diff = sim.output(0) & mask;
        if diff != 0 {
            let index = word * 64 + diff.trailing_zeros() as usize;
            return CheckerResult::not_equal(assignment(n_in, index));
        }
    }
    CheckerResult::equal()
}

impl Checker for RndChecker {
    fn registry(&self) -> Option<&CellTypeRegistry> {
        self.registry.as_deref()
    }

    fn check_miter(&self, miter: &Subnet) -> CheckerResult {
        let mut progress = Progress::new("rnd");
        let expanded = match validate_miter(miter, self.registry()) {
            Ok(m) => m,
            Err(result) => return progress.finish(result),
        };
        let miter = &*expanded;
        progress.advance(CheckerState::Simulate);

        let n_in = miter.in_num();
        let mut exhaustive = self.exhaustive || n_in <= self.exhaustive_bound;
        if exhaustive && n_in > MAX_EXHAUSTIVE_INPUTS {
            warn!(
                "{} inputs are too many to enumerate, sampling {} assignments instead",
                n_in, self.tries
            );
            exhaustive = false;
        }

        let result = if exhaustive {
            simulate_exhaustively(miter)
        } else {
            self.random(miter)
        };
        if let Some(cex) = result.counterexample() {
            assert!(
                is_counterexample(miter, cex),
                "Simulation produced a spurious counterexample"
            );
        }
        progress.finish(result)
    }
}
