//! SAT solver interface and its varisat backend.

use std::fmt::{Display, Formatter};
use std::ops::Neg;

use thiserror::Error;

/// Literal in DIMACS convention: variable `v > 0` is `v`, its negation `-v`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Lit(i32);

impl Lit {
    pub fn new(var: u32, negated: bool) -> Self {
        assert_ne!(var, 0, "Variable index should not be zero");
        let v = var as i32;
        Self(if negated { -v } else { v })
    }

    pub const fn positive(var: u32) -> Self {
        Self(var as i32)
    }

    pub const fn var(self) -> u32 {
        self.0.unsigned_abs()
    }

    pub const fn is_negated(self) -> bool {
        self.0 < 0
    }

    /// Return the DIMACS representation.
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Negates the literal if `negate` is set.
    pub fn xor(self, negate: bool) -> Self {
        if negate {
            -self
        } else {
            self
        }
    }
}

impl Neg for Lit {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Display for Lit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Satisfying assignment; variables the solver never saw are false.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
    values: Vec<bool>,
}

impl Model {
    pub fn new(values: Vec<bool>) -> Self {
        Self { values }
    }

    pub fn value(&self, lit: Lit) -> bool {
        let value = self.values.get(lit.var() as usize).copied().unwrap_or(false);
        value ^ lit.is_negated()
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("SAT backend failure: {0}")]
    Backend(varisat::solver::SolverError),
    #[error("solver reported SAT without a model")]
    MissingModel,
}

impl From<varisat::solver::SolverError> for SolverError {
    fn from(error: varisat::solver::SolverError) -> Self {
        SolverError::Backend(error)
    }
}

/// CNF sink and decision procedure.
pub trait Solver {
    /// Allocates a fresh variable (1-based).
    fn new_var(&mut self) -> u32;

    fn add_clause(&mut self, clause: &[Lit]);

    /// Returns `Some(model)` if the formula is satisfiable under the
    /// assumptions, `None` if it is not.
    fn solve(&mut self, assumptions: &[Lit]) -> Result<Option<Model>, SolverError>;

    fn num_vars(&self) -> u32;
}

pub struct VarisatSolver {
    inner: varisat::Solver<'static>,
    num_vars: u32,
}

impl VarisatSolver {
    pub fn new() -> Self {
        Self {
            inner: varisat::Solver::new(),
            num_vars: 0,
        }
    }
}

impl Default for VarisatSolver {
    fn default() -> Self {
        Self::new()
    }
}

fn to_varisat(lit: Lit) -> varisat::Lit {
    varisat::Lit::from_dimacs(lit.get() as isize)
}

impl Solver for VarisatSolver {
    fn new_var(&mut self) -> u32 {
        self.num_vars += 1;
        self.num_vars
    }

    fn add_clause(&mut self, clause: &[Lit]) {
        let lits: Vec<varisat::Lit> = clause.iter().map(|&l| to_varisat(l)).collect();
        varisat::ExtendFormula::add_clause(&mut self.inner, &lits);
    }

    fn solve(&mut self, assumptions: &[Lit]) -> Result<Option<Model>, SolverError> {
        let lits: Vec<varisat::Lit> = assumptions.iter().map(|&l| to_varisat(l)).collect();
        self.inner.assume(&lits);
        if !self.inner.solve()? {
            return Ok(None);
        }
        let model = self.inner.model().ok_or(SolverError::MissingModel)?;
        let mut values = vec![false; self.num_vars as usize + 1];
        for lit in model {
            let var = lit.var().to_dimacs() as usize;
            if var < values.len() {
                values[var] = lit.is_positive();
            }
        }
        Ok(Some(Model::new(values)))
    }

    fn num_vars(&self) -> u32 {
        self.num_vars
    }
}
