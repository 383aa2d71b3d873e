//! SAT-based checking: the miter output is asserted and handed to a solver.

use std::rc::Rc;

use log::{debug, warn};

use crate::checker::rnd::simulate_exhaustively;
use crate::checker::{
    is_counterexample, validate_miter, Checker, CheckerResult, CheckerState, Progress,
};
use crate::celltype::CellTypeRegistry;
use crate::encoder::{EncoderContext, SubnetEncoder};
use crate::link::Link;
use crate::solver::{Solver, VarisatSolver};
use crate::subnet::Subnet;

/// Creates a fresh solver for every query.
pub type SolverFactory = fn() -> Box<dyn Solver>;

fn varisat_solver() -> Box<dyn Solver> {
    Box::new(VarisatSolver::new())
}

#[derive(Debug, Clone)]
pub struct SatChecker {
    sim_check_bound: usize,
    solver: SolverFactory,
    registry: Option<Rc<CellTypeRegistry>>,
}

impl Default for SatChecker {
    fn default() -> Self {
        Self {
            sim_check_bound: 12,
            solver: varisat_solver,
            registry: None,
        }
    }
}

impl SatChecker {
    /// Miters with at most this many inputs are simulated exhaustively
    /// instead of being encoded.
    pub fn with_sim_check_bound(mut self, bound: usize) -> Self {
        self.sim_check_bound = bound;
        self
    }

    pub fn with_solver(mut self, solver: SolverFactory) -> Self {
        self.solver = solver;
        self
    }

    /// Library whose implementations replace custom cells before checking.
    pub fn with_registry(mut self, registry: Rc<CellTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn new_solver(&self) -> Box<dyn Solver> {
        (self.solver)()
    }

    /// Encodes the miter and asks the solver for an assignment setting its
    /// output to 1.
    pub fn prove(&self, miter: &Subnet) -> CheckerResult {
        let mut solver = self.new_solver();
        let mut ctx = EncoderContext::new(miter.size());
        SubnetEncoder::new().encode_subnet(miter, &mut ctx, solver.as_mut());
        let out = ctx.lit(Link::new(miter.out_idx(0)));
        debug!("solving for {} over {} variables", out, solver.num_vars());

        match solver.solve(&[out]) {
            Ok(None) => CheckerResult::equal(),
            Ok(Some(model)) => {
                let cex: Vec<bool> = (0..miter.in_num())
                    .map(|i| model.value(ctx.lit(miter.in_link(i))))
                    .collect();
                if is_counterexample(miter, &cex) {
                    CheckerResult::not_equal(cex)
                } else {
                    warn!("Solver model is not a counterexample");
                    CheckerResult::unknown()
                }
            }
            Err(e) => {
                warn!("Solver failed: {}", e);
                CheckerResult::unknown()
            }
        }
    }
}

impl Checker for SatChecker {
    fn registry(&self) -> Option<&CellTypeRegistry> {
        self.registry.as_deref()
    }

    fn check_miter(&self, miter: &Subnet) -> CheckerResult {
        let mut progress = Progress::new("sat");
        let expanded = match validate_miter(miter, self.registry()) {
            Ok(m) => m,
            Err(result) => return progress.finish(result),
        };
        let miter = &*expanded;

        if miter.in_num() <= self.sim_check_bound {
            progress.advance(CheckerState::Simulate);
            let result = simulate_exhaustively(miter);
            return progress.finish(result);
        }

        progress.advance(CheckerState::Encode);
        let result = self.prove(miter);
        progress.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::checker::tests::{and2, nor8_flat, nor8_tree, or2, ripple_adder, ripple_adder_gates};
    use crate::checker::CheckerStatus;
    use crate::miter::{miter, Binding};
    use crate::solver::{Lit, Model, SolverError};

    fn sat_only() -> SatChecker {
        SatChecker::default().with_sim_check_bound(0)
    }

    #[test]
    fn test_and_vs_and() {
        let result = sat_only().are_equal(&and2(), &and2(), &Binding::identity(2, 1));
        assert_eq!(result.status, CheckerStatus::Equal);
        assert_eq!(result.counterexample(), None);
    }

    #[test]
    fn test_or_vs_and() {
        let result = sat_only().are_equal(&or2(), &and2(), &Binding::identity(2, 1));
        assert_eq!(result.status, CheckerStatus::NotEqual);
        let cex = result.counterexample().unwrap();
        println!("counterexample: {:?}", cex);
        assert!(cex == [true, false] || cex == [false, true]);
    }

    #[test]
    fn test_nor_tree() {
        let result = sat_only().are_equal(&nor8_flat(), &nor8_tree(), &Binding::identity(8, 1));
        assert!(result.is_equal());
    }

    #[test]
    fn test_adder() {
        let n = 16;
        let binding = Binding::identity(2 * n, n + 1);
        let result = SatChecker::default().are_equal(&ripple_adder(n), &ripple_adder_gates(n), &binding);
        assert!(result.is_equal());
    }

    #[test]
    fn test_simulation_path() {
        let m = miter(&or2(), &and2(), &Binding::identity(2, 1)).unwrap();
        let result = SatChecker::default().check_miter(&m);
        assert_eq!(result.counterexample(), Some(&[true, false][..]));
    }

    struct FailingSolver;

    impl Solver for FailingSolver {
        fn new_var(&mut self) -> u32 {
            1
        }
        fn add_clause(&mut self, _clause: &[Lit]) {}
        fn solve(&mut self, _assumptions: &[Lit]) -> Result<Option<Model>, SolverError> {
            Err(SolverError::MissingModel)
        }
        fn num_vars(&self) -> u32 {
            1
        }
    }

    #[test]
    fn test_solver_failure_is_unknown() {
        let checker = sat_only().with_solver(|| Box::new(FailingSolver));
        let result = checker.are_equal(&and2(), &and2(), &Binding::identity(2, 1));
        assert!(result.is_unknown());
    }
}
