//! Combinational equivalence checking.
//!
//! Every strategy works on a miter (see [`crate::miter`]) and answers with a
//! four-valued [`CheckerStatus`]. Counterexamples are input assignments in
//! the input order of the left circuit, and are always confirmed by
//! simulation before being reported.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::{debug, error, info};

use crate::builder::SubnetBuilder;
use crate::celltype::CellTypeRegistry;
use crate::miter::{miter, Binding};
use crate::simulator::Simulator;
use crate::subnet::Subnet;

pub mod cut;
pub mod fraig;
pub mod rnd;
pub mod sat;

pub use cut::CutChecker;
pub use fraig::FraigChecker;
pub use rnd::RndChecker;
pub use sat::SatChecker;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CheckerStatus {
    Equal,
    NotEqual,
    /// The strategy gave up: budget exhausted or solver failure.
    Unknown,
    /// Malformed input.
    Error,
}

impl Display for CheckerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckerStatus::Equal => "EQUAL",
            CheckerStatus::NotEqual => "NOT_EQUAL",
            CheckerStatus::Unknown => "UNKNOWN",
            CheckerStatus::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Progress of a single check.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CheckerState {
    Init,
    Simulate,
    Encode,
    Done(CheckerStatus),
}

impl Display for CheckerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckerState::Init => write!(f, "INIT"),
            CheckerState::Simulate => write!(f, "SIMULATE"),
            CheckerState::Encode => write!(f, "ENCODE"),
            CheckerState::Done(status) => write!(f, "{}", status),
        }
    }
}

/// State holder that traces every transition.
#[derive(Debug)]
pub(crate) struct Progress {
    name: &'static str,
    state: CheckerState,
}

impl Progress {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            state: CheckerState::Init,
        }
    }

    pub(crate) fn advance(&mut self, next: CheckerState) {
        debug!("{}: {} -> {}", self.name, self.state, next);
        self.state = next;
    }

    /// Moves to the final state and reports the verdict.
    pub(crate) fn finish(&mut self, result: CheckerResult) -> CheckerResult {
        self.advance(CheckerState::Done(result.status));
        info!("{}: {}", self.name, result.status);
        result
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CheckerResult {
    pub status: CheckerStatus,
    pub counterexample: Option<Vec<bool>>,
}

impl CheckerResult {
    pub fn equal() -> Self {
        Self::with_status(CheckerStatus::Equal)
    }

    pub fn not_equal(counterexample: Vec<bool>) -> Self {
        Self {
            status: CheckerStatus::NotEqual,
            counterexample: Some(counterexample),
        }
    }

    pub fn unknown() -> Self {
        Self::with_status(CheckerStatus::Unknown)
    }

    pub fn error() -> Self {
        Self::with_status(CheckerStatus::Error)
    }

    fn with_status(status: CheckerStatus) -> Self {
        Self {
            status,
            counterexample: None,
        }
    }

    pub fn is_equal(&self) -> bool {
        self.status == CheckerStatus::Equal
    }
    pub fn is_not_equal(&self) -> bool {
        self.status == CheckerStatus::NotEqual
    }
    pub fn is_unknown(&self) -> bool {
        self.status == CheckerStatus::Unknown
    }
    pub fn is_error(&self) -> bool {
        self.status == CheckerStatus::Error
    }

    pub fn counterexample(&self) -> Option<&[bool]> {
        self.counterexample.as_deref()
    }
}

pub trait Checker {
    /// Checks that the single output of `miter` is constant zero.
    fn check_miter(&self, miter: &Subnet) -> CheckerResult;

    /// Library used to expand custom cells before checking.
    fn registry(&self) -> Option<&CellTypeRegistry> {
        None
    }

    /// Checks `lhs` and `rhs` for equivalence under `binding`.
    fn are_equal(&self, lhs: &Subnet, rhs: &Subnet, binding: &Binding) -> CheckerResult {
        match prepare_miter(lhs, rhs, binding, self.registry()) {
            Ok(m) => self.check_miter(&m),
            Err(result) => result,
        }
    }
}

/// Replaces library cells with their implementations. Cells without one
/// (or a missing registry) give an ERROR result.
pub(crate) fn expand<'a>(
    subnet: &'a Subnet,
    registry: Option<&CellTypeRegistry>,
) -> Result<Cow<'a, Subnet>, CheckerResult> {
    if !subnet.has_custom_cells() {
        return Ok(Cow::Borrowed(subnet));
    }
    match registry.and_then(|r| SubnetBuilder::flatten(subnet, r)) {
        Some(flat) => Ok(Cow::Owned(Rc::unwrap_or_clone(flat))),
        None => {
            error!("Library cells without an implementation are not supported by the checkers");
            Err(CheckerResult::error())
        }
    }
}

/// Validates a pair of circuits and builds their miter; a failure comes
/// back as an ERROR result.
pub(crate) fn prepare_miter(
    lhs: &Subnet,
    rhs: &Subnet,
    binding: &Binding,
    registry: Option<&CellTypeRegistry>,
) -> Result<Rc<Subnet>, CheckerResult> {
    if lhs.is_sequential() != rhs.is_sequential() {
        error!("Cannot compare a sequential circuit with a combinational one");
        return Err(CheckerResult::error());
    }
    let lhs = expand(lhs, registry)?;
    let rhs = expand(rhs, registry)?;
    miter(&lhs, &rhs, binding).map_err(|_| CheckerResult::error())
}

/// Rejects miters the strategies cannot handle and expands library cells.
pub(crate) fn validate_miter<'a>(
    miter: &'a Subnet,
    registry: Option<&CellTypeRegistry>,
) -> Result<Cow<'a, Subnet>, CheckerResult> {
    if miter.out_num() != 1 {
        error!("Miter should have a single output, got {}", miter.out_num());
        return Err(CheckerResult::error());
    }
    expand(miter, registry)
}

/// The miter output is 1 under the assignment.
pub(crate) fn is_counterexample(miter: &Subnet, inputs: &[bool]) -> bool {
    inputs.len() == miter.in_num() && Simulator::new(miter).evaluate(inputs)[0]
}

/// Equivalence checking strategy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Strategy {
    Simulation,
    Sat,
    Fraig,
    Cut,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Simulation,
        Strategy::Sat,
        Strategy::Fraig,
        Strategy::Cut,
    ];

    /// Default-configured checker for the strategy.
    pub fn checker(self) -> Box<dyn Checker> {
        match self {
            Strategy::Simulation => Box::new(RndChecker::default()),
            Strategy::Sat => Box::new(SatChecker::default()),
            Strategy::Fraig => Box::new(FraigChecker::default()),
            Strategy::Cut => Box::new(CutChecker::default()),
        }
    }

    /// Default configuration that expands custom cells through `registry`.
    pub fn checker_with_registry(self, registry: Rc<CellTypeRegistry>) -> Box<dyn Checker> {
        match self {
            Strategy::Simulation => Box::new(RndChecker::default().with_registry(registry)),
            Strategy::Sat => Box::new(SatChecker::default().with_registry(registry)),
            Strategy::Fraig => Box::new(FraigChecker::default().with_registry(registry)),
            Strategy::Cut => Box::new(CutChecker::default().with_registry(registry)),
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Simulation => "simulation",
            Strategy::Sat => "sat",
            Strategy::Fraig => "fraig",
            Strategy::Cut => "cut",
        };
        write!(f, "{}", name)
    }
}
