//! Functional reduction of the miter: cells that simulate alike are proven
//! equal on their fan-in cones and merged, round after round, before a
//! final SAT check of what is left.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::builder::SubnetBuilder;
use crate::checker::sat::SatChecker;
use crate::checker::{
    is_counterexample, validate_miter, Checker, CheckerResult, CheckerState, Progress,
};
use crate::celltype::CellTypeRegistry;
use crate::encoder::{EncoderContext, SubnetEncoder};
use crate::link::Link;
use crate::simulator::{link_words, simulate_builder};
use crate::solver::Lit;
use crate::subnet::Subnet;
use crate::types::EntryId;

#[derive(Debug, Clone)]
pub struct FraigChecker {
    sim_words: usize,
    max_rounds: usize,
    seed: u64,
    sat: SatChecker,
    registry: Option<Rc<CellTypeRegistry>>,
}

impl Default for FraigChecker {
    fn default() -> Self {
        Self {
            sim_words: 4,
            max_rounds: 16,
            seed: 0,
            sat: SatChecker::default(),
            registry: None,
        }
    }
}

/// Outcome of a cone query.
#[derive(Debug, Clone, Eq, PartialEq)]
enum Proof {
    Equal,
    Differ(Vec<bool>),
    Unknown,
}

/// Candidates of one round.
#[derive(Debug, Default)]
struct Classes {
    /// Representative and the cells that simulate exactly like it.
    equal: Vec<(EntryId, EntryId)>,
    /// Cells and the constant they simulate as.
    constant: Vec<(EntryId, bool)>,
}

impl FraigChecker {
    /// Random words per input per round.
    pub fn with_sim_words(mut self, words: usize) -> Self {
        self.sim_words = words;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checker used for the residual miter.
    pub fn with_sat_checker(mut self, sat: SatChecker) -> Self {
        self.sat = sat;
        self
    }

    /// Library whose implementations replace custom cells before checking.
    pub fn with_registry(mut self, registry: Rc<CellTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Random words for every input followed by the collected
    /// counterexamples packed into extra words.
    fn patterns(&self, rng: &mut ChaCha8Rng, n_in: usize, cexs: &[Vec<bool>]) -> Vec<Vec<u64>> {
        let extra = cexs.len().div_ceil(64);
        (0..n_in)
            .map(|i| {
                let mut words: Vec<u64> = (0..self.sim_words).map(|_| rng.gen()).collect();
                let mut packed = vec![0u64; extra];
                for (k, cex) in cexs.iter().enumerate() {
                    if cex[i] {
                        packed[k / 64] |= 1 << (k % 64);
                    }
                }
                words.extend(packed);
                words
            })
            .collect()
    }

    /// Groups cells by simulation signature.
    fn classes(&self, builder: &SubnetBuilder, values: &[Vec<u64>]) -> Classes {
        let mut classes = Classes::default();
        let mut representative: HashMap<&[u64], EntryId> = HashMap::new();
        for id in builder.iter() {
            let cell = builder.cell(id);
            if cell.is_out() || cell.is_zero() || cell.is_one() {
                continue;
            }
            let signature = values[id.index()].as_slice();
            if !cell.is_in() {
                if signature.iter().all(|&w| w == 0) {
                    classes.constant.push((id, false));
                    continue;
                }
                if signature.iter().all(|&w| w == u64::MAX) {
                    classes.constant.push((id, true));
                    continue;
                }
            }
            match representative.get(signature) {
                Some(&rep) if !cell.is_in() => classes.equal.push((rep, id)),
                Some(_) => {}
                None => {
                    representative.insert(signature, id);
                }
            }
        }
        classes
    }

    /// Entries of the fan-in cones of `roots` in topological order.
    fn cone(builder: &mut SubnetBuilder, roots: &[EntryId]) -> Vec<EntryId> {
        builder.start_session();
        let mut cone = Vec::new();
        let mut stack = roots.to_vec();
        while let Some(id) = stack.pop() {
            if builder.is_marked(id) {
                continue;
            }
            builder.mark(id);
            cone.push(id);
            stack.extend(builder.links(id).iter().map(|l| l.idx()));
        }
        builder.end_session();
        cone.sort_by_key(|&id| builder.depth(id));
        cone
    }

    /// Proves `a` equal to `b`, or to the constant `value` when `b` is `Err(value)`.
    fn prove(&self, builder: &mut SubnetBuilder, a: EntryId, b: Result<EntryId, bool>) -> Proof {
        let roots = match b {
            Ok(b) => vec![a, b],
            Err(_) => vec![a],
        };
        let cone = Self::cone(builder, &roots);
        let mut solver = self.sat.new_solver();
        let mut ctx = EncoderContext::new(builder.max_idx());
        SubnetEncoder::new().encode_cells(&*builder, &cone, &mut ctx, solver.as_mut());

        let la = ctx.lit(Link::new(a));
        let queries: Vec<Vec<Lit>> = match b {
            Ok(b) => {
                let lb = ctx.lit(Link::new(b));
                vec![vec![la, -lb], vec![-la, lb]]
            }
            Err(value) => vec![vec![la.xor(value)]],
        };
        for query in queries {
            match solver.solve(&query) {
                Ok(None) => {}
                Ok(Some(model)) => {
                    let cex = (0..builder.in_num())
                        .map(|i| {
                            let id = builder.input(i);
                            ctx.is_encoded(id) && model.value(ctx.lit(Link::new(id)))
                        })
                        .collect();
                    return Proof::Differ(cex);
                }
                Err(e) => {
                    warn!("Solver failed on a cone query: {}", e);
                    return Proof::Unknown;
                }
            }
        }
        Proof::Equal
    }

    /// One reduction round. Returns the number of merged cells, or a
    /// counterexample if the miter output was seen at 1.
    fn round(
        &self,
        builder: &mut SubnetBuilder,
        rng: &mut ChaCha8Rng,
        cexs: &mut Vec<Vec<bool>>,
    ) -> Result<usize, Vec<bool>> {
        let n_in = builder.in_num();
        let inputs = self.patterns(rng, n_in, cexs);
        let values = simulate_builder(builder, &inputs);

        let out = builder.link(builder.output(0), 0);
        let diff = link_words(&values, out);
        if let Some((w, &word)) = diff.iter().enumerate().find(|(_, word)| **word != 0) {
            let bit = word.trailing_zeros();
            return Err(inputs.iter().map(|words| (words[w] >> bit) & 1 == 1).collect());
        }

        let classes = self.classes(builder, &values);
        debug!(
            "fraig: {} equal and {} constant candidates",
            classes.equal.len(),
            classes.constant.len()
        );

        let mut zeros = BTreeSet::new();
        let mut ones = BTreeSet::new();
        for &(id, value) in &classes.constant {
            match self.prove(builder, id, Err(value)) {
                Proof::Equal if value => {
                    ones.insert(id);
                }
                Proof::Equal => {
                    zeros.insert(id);
                }
                Proof::Differ(cex) => cexs.push(cex),
                Proof::Unknown => {}
            }
        }

        let mut merges: BTreeMap<EntryId, BTreeSet<EntryId>> = BTreeMap::new();
        for &(rep, id) in &classes.equal {
            match self.prove(builder, rep, Ok(id)) {
                Proof::Equal => {
                    merges.entry(rep).or_default().insert(id);
                }
                Proof::Differ(cex) => cexs.push(cex),
                Proof::Unknown => {}
            }
        }

        let merged = zeros.len() + ones.len() + merges.values().map(|s| s.len()).sum::<usize>();
        builder.replace_with_zero(&zeros);
        let ones: BTreeSet<EntryId> = ones.into_iter().filter(|&id| builder.is_live(id)).collect();
        builder.replace_with_one(&ones);
        // Constant merges may have collected cells of the remaining groups.
        let merges: BTreeMap<EntryId, BTreeSet<EntryId>> = merges
            .into_iter()
            .filter(|(rep, _)| builder.is_live(*rep))
            .map(|(rep, ids)| {
                let ids: BTreeSet<EntryId> = ids.into_iter().filter(|&id| builder.is_live(id)).collect();
                (rep, ids)
            })
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        builder.merge_cells(&merges);
        Ok(merged)
    }
}

impl Checker for FraigChecker {
    fn registry(&self) -> Option<&CellTypeRegistry> {
        self.registry.as_deref()
    }

    fn check_miter(&self, miter: &Subnet) -> CheckerResult {
        let mut progress = Progress::new("fraig");
        let expanded = match validate_miter(miter, self.registry()) {
            Ok(m) => m,
            Err(result) => return progress.finish(result),
        };
        let miter = &*expanded;

        let mut builder = SubnetBuilder::from_subnet(miter);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut cexs: Vec<Vec<bool>> = Vec::new();

        progress.advance(CheckerState::Simulate);
        for round in 0..self.max_rounds {
            let before = builder.cell_num();
            match self.round(&mut builder, &mut rng, &mut cexs) {
                Err(cex) => {
                    assert!(
                        is_counterexample(miter, &cex),
                        "Reduced miter disagrees with the original"
                    );
                    return progress.finish(CheckerResult::not_equal(cex));
                }
                Ok(0) => {
                    debug!("fraig: round {} merged nothing", round);
                    break;
                }
                Ok(merged) => {
                    debug!(
                        "fraig: round {} merged {} cells, {} -> {} cells",
                        round,
                        merged,
                        before,
                        builder.cell_num()
                    );
                }
            }
        }

        progress.advance(CheckerState::Encode);
        let residual = builder.make(true);
        let root = residual.out_link(0);
        let cell = residual.cell(root.idx());
        if (cell.is_zero() && !root.inv()) || (cell.is_one() && root.inv()) {
            debug!("fraig: miter output reduced to constant zero");
            return progress.finish(CheckerResult::equal());
        }
        let result = self.sat.check_miter(&residual);
        if let Some(cex) = result.counterexample() {
            assert!(
                is_counterexample(miter, cex),
                "Reduced miter disagrees with the original"
            );
        }
        progress.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::celltype::CellSymbol;
    use crate::checker::tests::{broken_adder, nor8_flat, nor8_tree, ripple_adder, ripple_adder_gates};
    use crate::checker::CheckerStatus;
    use crate::miter::{build_miter, miter, Binding};

    #[test]
    fn test_reduces_adder_miter() {
        let n = 12;
        let binding = Binding::identity(2 * n, n + 1);
        let m = miter(&ripple_adder(n), &ripple_adder_gates(n), &binding).unwrap();
        let result = FraigChecker::default().check_miter(&m);
        assert_eq!(result.status, CheckerStatus::Equal);
    }

    #[test]
    fn test_broken_adder() {
        let n = 12;
        let binding = Binding::identity(2 * n, n + 1);
        let m = miter(&ripple_adder(n), &broken_adder(n), &binding).unwrap();
        let result = FraigChecker::default().check_miter(&m);
        assert_eq!(result.status, CheckerStatus::NotEqual);
        assert!(is_counterexample(&m, result.counterexample().unwrap()));
    }

    #[test]
    fn test_round_merges_equal_cones() {
        let mut builder = build_miter(&nor8_flat(), &nor8_tree(), &Binding::identity(8, 1)).unwrap();
        let checker = FraigChecker::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut cexs = Vec::new();
        let merged = checker.round(&mut builder, &mut rng, &mut cexs).unwrap();
        println!("merged {} cells, {} left", merged, builder.cell_num());
        assert!(merged > 0);
        assert!(cexs.is_empty());
        // The miter collapses to a constant zero output.
        let residual = builder.make(true);
        let root = residual.out_link(0);
        assert!(residual.cell(root.idx()).is_zero());
        assert!(!root.inv());
    }

    #[test]
    fn test_prove_constant() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let b = builder.add_cell(CellSymbol::And, &[a, !x[0]]);
        let c = builder.add_cell(CellSymbol::Or, &[x[0], x[1]]);
        builder.add_outputs(&[b, c]);
        let checker = FraigChecker::default();
        assert_eq!(checker.prove(&mut builder, b.idx(), Err(false)), Proof::Equal);
        match checker.prove(&mut builder, c.idx(), Err(false)) {
            Proof::Differ(cex) => assert!(cex[0] || cex[1]),
            other => panic!("unexpected {:?}", other),
        }
        match checker.prove(&mut builder, a.idx(), Ok(c.idx())) {
            Proof::Differ(cex) => assert_ne!(cex[0], cex[1]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
