//! Cut/BDD hybrid checking.
//!
//! Both circuits are hashed into one AND-inverter vertex table, so logic
//! shared by the two sides collapses into the same vertices. Decision
//! diagrams are then built bottom-up, smallest first. A vertex whose
//! diagram grows past the size cap becomes a cut: it gets a fresh variable
//! instead of its function. Equal diagrams prove equality even through
//! cuts; a difference is only trusted when it depends on primary inputs
//! alone. Inconclusive rounds are retried with a larger cap.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::{Display, Formatter};
use std::ops::Not;
use std::rc::Rc;

use log::debug;

use crate::bdd::Bdd;
use crate::checker::{
    expand, is_counterexample, prepare_miter, validate_miter, Checker, CheckerResult, CheckerState,
    Progress,
};
use crate::celltype::{CellSymbol, CellTypeRegistry};
use crate::link::Link;
use crate::miter::Binding;
use crate::reference::Ref;
use crate::subnet::Subnet;

/// Literal of the vertex table: `vertex << 1 | inverted`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AigLit(u32);

impl AigLit {
    pub const FALSE: AigLit = AigLit(0);
    pub const TRUE: AigLit = AigLit(1);

    fn new(vertex: u32, inv: bool) -> Self {
        Self(vertex << 1 | inv as u32)
    }

    pub fn vertex(self) -> u32 {
        self.0 >> 1
    }

    pub fn is_inverted(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn xor_inv(self, inv: bool) -> Self {
        Self(self.0 ^ inv as u32)
    }
}

impl Not for AigLit {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(self.0 ^ 1)
    }
}

impl Display for AigLit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", if self.is_inverted() { "~" } else { "" }, self.vertex())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Vertex {
    Const,
    Input(usize),
    And(AigLit, AigLit),
}

/// Structurally hashed AND-inverter graph. Vertex `0` is constant false.
#[derive(Debug, Clone)]
pub struct Aig {
    vertices: Vec<Vertex>,
    strash: HashMap<(AigLit, AigLit), u32>,
    inputs: Vec<AigLit>,
}

impl Aig {
    pub fn new(n_in: usize) -> Self {
        let mut vertices = vec![Vertex::Const];
        let mut inputs = Vec::with_capacity(n_in);
        for i in 0..n_in {
            inputs.push(AigLit::new(vertices.len() as u32, false));
            vertices.push(Vertex::Input(i));
        }
        Self {
            vertices,
            strash: HashMap::new(),
            inputs,
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn input(&self, i: usize) -> AigLit {
        self.inputs[i]
    }

    pub fn and(&mut self, a: AigLit, b: AigLit) -> AigLit {
        if a == AigLit::FALSE || b == AigLit::FALSE || a == !b {
            return AigLit::FALSE;
        }
        if a == AigLit::TRUE || a == b {
            return b;
        }
        if b == AigLit::TRUE {
            return a;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(&v) = self.strash.get(&key) {
            return AigLit::new(v, false);
        }
        let v = self.vertices.len() as u32;
        self.vertices.push(Vertex::And(key.0, key.1));
        self.strash.insert(key, v);
        AigLit::new(v, false)
    }

    pub fn or(&mut self, a: AigLit, b: AigLit) -> AigLit {
        !self.and(!a, !b)
    }

    pub fn xor(&mut self, a: AigLit, b: AigLit) -> AigLit {
        let l = self.and(a, !b);
        let r = self.and(!a, b);
        self.or(l, r)
    }

    /// At least `k` of `args` are true.
    fn threshold(&mut self, args: &[AigLit], k: usize) -> AigLit {
        // at_least[t]: at least t of the arguments seen so far.
        let mut at_least = vec![AigLit::FALSE; k + 1];
        at_least[0] = AigLit::TRUE;
        for &x in args {
            for t in (1..=k).rev() {
                let with = self.and(x, at_least[t - 1]);
                at_least[t] = self.or(at_least[t], with);
            }
        }
        at_least[k]
    }

    pub fn maj(&mut self, args: &[AigLit]) -> AigLit {
        if let [a, b, c] = *args {
            let ab = self.and(a, b);
            let ac = self.and(a, c);
            let bc = self.and(b, c);
            let t = self.or(ab, ac);
            return self.or(t, bc);
        }
        self.threshold(args, args.len() / 2 + 1)
    }

    /// Hashes the builtin cells of `subnet` with its inputs bound to
    /// `inputs`; returns the literals of its outputs.
    pub fn add_subnet(&mut self, subnet: &Subnet, inputs: &[AigLit]) -> Vec<AigLit> {
        assert_eq!(inputs.len(), subnet.in_num(), "Input count mismatch");
        let mut map = vec![AigLit::FALSE; subnet.size()];
        let mut outputs = Vec::with_capacity(subnet.out_num());
        let lit = |map: &[AigLit], l: Link| map[l.idx().index()].xor_inv(l.inv());
        for (id, cell) in subnet.cells() {
            let args: Vec<AigLit> = subnet.links(id).iter().map(|&l| lit(&map, l)).collect();
            let value = match cell.symbol() {
                CellSymbol::In => inputs[id.index()],
                CellSymbol::Zero => AigLit::FALSE,
                CellSymbol::One => AigLit::TRUE,
                CellSymbol::Buf => args[0],
                CellSymbol::Out => {
                    outputs.push(args[0]);
                    args[0]
                }
                CellSymbol::And => args.iter().fold(AigLit::TRUE, |acc, &a| self.and(acc, a)),
                CellSymbol::Or => args.iter().fold(AigLit::FALSE, |acc, &a| self.or(acc, a)),
                CellSymbol::Xor => args.iter().fold(AigLit::FALSE, |acc, &a| self.xor(acc, a)),
                CellSymbol::Maj => self.maj(&args),
                CellSymbol::Undef => panic!("Library cells cannot be hashed"),
            };
            map[id.index()] = value;
        }
        outputs
    }

    /// Vertices reachable from `roots`, in increasing order.
    fn cone(&self, roots: &[AigLit]) -> Vec<u32> {
        let mut seen = vec![false; self.vertices.len()];
        let mut stack: Vec<u32> = roots.iter().map(|l| l.vertex()).collect();
        while let Some(v) = stack.pop() {
            if std::mem::replace(&mut seen[v as usize], true) {
                continue;
            }
            if let Vertex::And(a, b) = self.vertices[v as usize] {
                stack.push(a.vertex());
                stack.push(b.vertex());
            }
        }
        (0..self.vertices.len() as u32)
            .filter(|&v| seen[v as usize])
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CutChecker {
    initial_cap: usize,
    growth: usize,
    max_cap: usize,
    registry: Option<Rc<CellTypeRegistry>>,
}

impl Default for CutChecker {
    fn default() -> Self {
        Self {
            initial_cap: 32,
            growth: 2,
            max_cap: 1024,
            registry: None,
        }
    }
}

/// Verdict of one comparison.
#[derive(Debug, Clone, Eq, PartialEq)]
enum Verdict {
    Equal,
    NotEqual(Vec<bool>),
    Inconclusive,
}

impl CutChecker {
    /// Diagram size cap of the first round.
    pub fn with_initial_cap(mut self, cap: usize) -> Self {
        self.initial_cap = cap;
        self
    }

    /// Factor the cap grows by between rounds.
    pub fn with_growth(mut self, growth: usize) -> Self {
        assert!(growth >= 2, "Cap growth should be at least 2");
        self.growth = growth;
        self
    }

    /// Largest cap tried before giving up.
    pub fn with_max_cap(mut self, cap: usize) -> Self {
        self.max_cap = cap;
        self
    }

    /// Library whose implementations replace custom cells before checking.
    pub fn with_registry(mut self, registry: Rc<CellTypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Compares two diagrams over `n_in` primary variables.
    fn compare(bdd: &Bdd, f: Ref, g: Ref, n_in: usize) -> Verdict {
        if f == g {
            return Verdict::Equal;
        }
        if f == -g {
            // Complements differ everywhere.
            return Verdict::NotEqual(vec![false; n_in]);
        }
        let diff = bdd.apply_xor(f, g);
        if bdd.support(diff).iter().all(|&v| v as usize <= n_in) {
            debug!(
                "cut: outputs differ on {} of 2^{} assignments",
                bdd.sat_count(diff, n_in),
                n_in
            );
            let mut cex = vec![false; n_in];
            for lit in bdd.one_sat(diff).unwrap_or_default() {
                cex[lit.unsigned_abs() as usize - 1] = lit > 0;
            }
            return Verdict::NotEqual(cex);
        }
        Verdict::Inconclusive
    }

    /// One round with the given cap over the target pairs.
    fn round(&self, aig: &Aig, n_in: usize, targets: &[(AigLit, AigLit)], cap: usize) -> Verdict {
        let mut pending: Vec<usize> = Vec::new();
        for (k, &(a, b)) in targets.iter().enumerate() {
            if a == b {
                continue;
            }
            if a == !b {
                return Verdict::NotEqual(vec![false; n_in]);
            }
            pending.push(k);
        }
        if pending.is_empty() {
            return Verdict::Equal;
        }

        let roots: Vec<AigLit> = pending
            .iter()
            .flat_map(|&k| [targets[k].0, targets[k].1])
            .collect();
        let cone = aig.cone(&roots);

        let mut users: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut waiting: HashMap<u32, usize> = HashMap::new();
        for &v in &cone {
            if let Vertex::And(a, b) = aig.vertices[v as usize] {
                let mut fanins = vec![a.vertex(), b.vertex()];
                fanins.dedup();
                waiting.insert(v, fanins.len());
                for u in fanins {
                    users.entry(u).or_default().push(v);
                }
            }
        }

        let bdd = Bdd::default();
        let mut functions: HashMap<u32, Ref> = HashMap::new();
        let mut cuts: HashMap<Ref, Ref> = HashMap::new();
        let mut next_cut = n_in as u32 + 1;
        let mut heap: BinaryHeap<Reverse<(usize, u32)>> = BinaryHeap::new();
        let value = |functions: &HashMap<u32, Ref>, l: AigLit| {
            let f = functions[&l.vertex()];
            if l.is_inverted() {
                -f
            } else {
                f
            }
        };

        for &v in &cone {
            match aig.vertices[v as usize] {
                Vertex::Const => heap.push(Reverse((0, v))),
                Vertex::Input(_) => heap.push(Reverse((1, v))),
                Vertex::And(..) => {}
            }
        }

        while let Some(Reverse((_, v))) = heap.pop() {
            let f = match aig.vertices[v as usize] {
                Vertex::Const => bdd.zero,
                Vertex::Input(i) => bdd.mk_var(i as u32 + 1),
                Vertex::And(a, b) => {
                    let f = bdd.apply_and(value(&functions, a), value(&functions, b));
                    if bdd.size(f) > cap {
                        // Equal functions share one cut variable.
                        let key = f.regular();
                        let var = *cuts.entry(key).or_insert_with(|| {
                            let var = bdd.mk_var(next_cut);
                            next_cut += 1;
                            var
                        });
                        if f.is_negated() {
                            -var
                        } else {
                            var
                        }
                    } else {
                        f
                    }
                }
            };
            functions.insert(v, f);

            if let Some(us) = users.get(&v) {
                for &u in us {
                    let Some(count) = waiting.get_mut(&u) else {
                        continue;
                    };
                    *count -= 1;
                    if *count == 0 {
                        let Vertex::And(a, b) = aig.vertices[u as usize] else {
                            continue;
                        };
                        let estimate = bdd.size(value(&functions, a)) + bdd.size(value(&functions, b));
                        heap.push(Reverse((estimate, u)));
                    }
                }
            }

            // Compare pairs as soon as both sides are built.
            let mut k = 0;
            while k < pending.len() {
                let (a, b) = targets[pending[k]];
                if functions.contains_key(&a.vertex()) && functions.contains_key(&b.vertex()) {
                    match Self::compare(&bdd, value(&functions, a), value(&functions, b), n_in) {
                        Verdict::Equal => {
                            pending.swap_remove(k);
                            continue;
                        }
                        Verdict::NotEqual(cex) => return Verdict::NotEqual(cex),
                        Verdict::Inconclusive => {
                            debug!("cut: pair {} is inconclusive under cap {}", pending[k], cap);
                            return Verdict::Inconclusive;
                        }
                    }
                }
                k += 1;
            }
            if pending.is_empty() {
                break;
            }
        }
        debug!(
            "cut: cap {}, {} vertices, {} cuts, {} diagram nodes",
            cap,
            functions.len(),
            next_cut as usize - n_in - 1,
            bdd.num_nodes()
        );

        if pending.is_empty() {
            Verdict::Equal
        } else {
            Verdict::Inconclusive
        }
    }

    /// Escalates the cap until a round is conclusive.
    fn solve(&self, aig: &Aig, n_in: usize, targets: &[(AigLit, AigLit)]) -> CheckerResult {
        let mut cap = self.initial_cap;
        loop {
            match self.round(aig, n_in, targets, cap) {
                Verdict::Equal => return CheckerResult::equal(),
                Verdict::NotEqual(cex) => return CheckerResult::not_equal(cex),
                Verdict::Inconclusive if cap >= self.max_cap => return CheckerResult::unknown(),
                Verdict::Inconclusive => {
                    cap = (cap * self.growth).min(self.max_cap);
                    debug!("cut: raising the cap to {}", cap);
                }
            }
        }
    }

    fn confirm(miter: &Subnet, result: CheckerResult) -> CheckerResult {
        if let Some(cex) = result.counterexample() {
            assert!(
                is_counterexample(miter, cex),
                "Diagram counterexample is not confirmed by simulation"
            );
        }
        result
    }
}

impl Checker for CutChecker {
    fn registry(&self) -> Option<&CellTypeRegistry> {
        self.registry.as_deref()
    }

    fn check_miter(&self, miter: &Subnet) -> CheckerResult {
        let mut progress = Progress::new("cut");
        let expanded = match validate_miter(miter, self.registry()) {
            Ok(m) => m,
            Err(result) => return progress.finish(result),
        };
        let miter = &*expanded;
        progress.advance(CheckerState::Encode);

        let mut aig = Aig::new(miter.in_num());
        let inputs: Vec<AigLit> = (0..miter.in_num()).map(|i| aig.input(i)).collect();
        let out = aig.add_subnet(miter, &inputs)[0];
        debug!("cut: {} vertices", aig.len());

        let result = self.solve(&aig, miter.in_num(), &[(out, AigLit::FALSE)]);
        progress.finish(Self::confirm(miter, result))
    }

    /// Hashes the two circuits side by side and compares bound output pairs
    /// directly instead of going through the miter output.
    fn are_equal(&self, lhs: &Subnet, rhs: &Subnet, binding: &Binding) -> CheckerResult {
        let mut progress = Progress::new("cut");
        let expanded = expand(lhs, self.registry())
            .and_then(|lhs| Ok((lhs, expand(rhs, self.registry())?)));
        let (lhs, rhs) = match expanded {
            Ok(pair) => pair,
            Err(result) => return progress.finish(result),
        };
        let miter = match prepare_miter(&lhs, &rhs, binding, None) {
            Ok(m) => m,
            Err(result) => return progress.finish(result),
        };
        progress.advance(CheckerState::Encode);

        let n_in = lhs.in_num();
        let mut aig = Aig::new(n_in);
        let lhs_inputs: Vec<AigLit> = (0..n_in).map(|i| aig.input(i)).collect();
        let mut rhs_inputs = vec![AigLit::FALSE; n_in];
        for &(l, r) in &binding.inputs {
            rhs_inputs[r] = lhs_inputs[l];
        }
        let lhs_outputs = aig.add_subnet(&lhs, &lhs_inputs);
        let rhs_outputs = aig.add_subnet(&rhs, &rhs_inputs);
        let targets: Vec<(AigLit, AigLit)> = binding
            .outputs
            .iter()
            .map(|&(l, r)| (lhs_outputs[l], rhs_outputs[r]))
            .collect();
        debug!("cut: {} shared vertices, {} output pairs", aig.len(), targets.len());

        let result = self.solve(&aig, n_in, &targets);
        progress.finish(Self::confirm(&miter, result))
    }
}
