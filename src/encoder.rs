//! Tseitin encoding of cells into CNF.
//!
//! Every cell output gets a literal. Buffers and outputs reuse the literal
//! of their fan-in, so a polarity flip never costs a variable.

use log::debug;

use crate::cell::Cell;
use crate::celltype::{CellSymbol, CellTypeRegistry};
use crate::link::Link;
use crate::solver::{Lit, Solver};
use crate::subnet::{CellView, Subnet};
use crate::types::EntryId;

/// Literals assigned to entries during encoding.
#[derive(Debug, Clone, Default)]
pub struct EncoderContext {
    lits: Vec<Vec<Lit>>,
}

impl EncoderContext {
    pub fn new(size: usize) -> Self {
        Self {
            lits: vec![Vec::new(); size],
        }
    }

    pub fn is_encoded(&self, id: EntryId) -> bool {
        self.lits.get(id.index()).is_some_and(|l| !l.is_empty())
    }

    /// Binds the outputs of an entry to the given literals.
    pub fn set(&mut self, id: EntryId, lits: Vec<Lit>) {
        if self.lits.len() <= id.index() {
            self.lits.resize(id.index() + 1, Vec::new());
        }
        self.lits[id.index()] = lits;
    }

    /// Literal of a link, inversion included.
    ///
    /// # Panics
    ///
    /// Panics if the source entry has not been encoded.
    pub fn lit(&self, link: Link) -> Lit {
        match self.lits.get(link.idx().index()).and_then(|l| l.get(link.out() as usize)) {
            Some(&lit) => lit.xor(link.inv()),
            None => panic!("Entry {} is not encoded", link.idx()),
        }
    }

    /// Literal of a link; an unencoded source gets a fresh unconstrained variable.
    pub fn lit_or_fresh<S: Solver + ?Sized>(&mut self, link: Link, solver: &mut S) -> Lit {
        if !self.is_encoded(link.idx()) {
            let lit = Lit::positive(solver.new_var());
            self.set(link.idx(), vec![lit]);
        }
        self.lit(link)
    }
}

fn equal<S: Solver + ?Sized>(solver: &mut S, a: Lit, b: Lit) {
    solver.add_clause(&[-a, b]);
    solver.add_clause(&[a, -b]);
}

/// y = a1 & ... & an
fn encode_and<S: Solver + ?Sized>(solver: &mut S, y: Lit, args: &[Lit]) {
    let mut big = vec![y];
    for &a in args {
        solver.add_clause(&[-y, a]);
        big.push(-a);
    }
    solver.add_clause(&big);
}

/// y = a ^ b
fn encode_xor2<S: Solver + ?Sized>(solver: &mut S, y: Lit, a: Lit, b: Lit) {
    solver.add_clause(&[-a, -b, -y]);
    solver.add_clause(&[a, b, -y]);
    solver.add_clause(&[a, -b, y]);
    solver.add_clause(&[-a, b, y]);
}

/// Calls `f` on every `k`-subset of `items`.
fn for_each_subset(items: &[Lit], k: usize, f: &mut dyn FnMut(&[Lit])) {
    fn go(items: &[Lit], k: usize, start: usize, chosen: &mut Vec<Lit>, f: &mut dyn FnMut(&[Lit])) {
        if chosen.len() == k {
            f(chosen);
            return;
        }
        for i in start..items.len() {
            if items.len() - i < k - chosen.len() {
                break;
            }
            chosen.push(items[i]);
            go(items, k, i + 1, chosen, f);
            chosen.pop();
        }
    }
    go(items, k, 0, &mut Vec::with_capacity(k), f);
}

/// Widest MAJ encoded clause-by-clause over argument subsets.
const MAJ_SUBSET_ARITY: usize = 7;

/// y = MAJ(a1, ..., an), n odd.
fn encode_maj<S: Solver + ?Sized>(solver: &mut S, y: Lit, args: &[Lit]) {
    let n = args.len();
    let k = n / 2 + 1;
    if n > MAJ_SUBSET_ARITY {
        encode_at_least(solver, y, args, k);
        return;
    }
    // y implies at least k true: every (n - k + 1)-subset has a true literal.
    for_each_subset(args, n - k + 1, &mut |subset| {
        let mut clause = vec![-y];
        clause.extend_from_slice(subset);
        solver.add_clause(&clause);
    });
    // !y implies at most k - 1 true: every k-subset has a false literal.
    for_each_subset(args, k, &mut |subset| {
        let mut clause = vec![y];
        clause.extend(subset.iter().map(|&a| -a));
        solver.add_clause(&clause);
    });
}

/// y = (at least `k` of `args` are true), as a sequential counter.
fn encode_at_least<S: Solver + ?Sized>(solver: &mut S, y: Lit, args: &[Lit], k: usize) {
    assert!(k >= 1, "Threshold should be positive");
    // count[j]: at least j of the arguments seen so far; `None` is constant false.
    let mut count: Vec<Option<Lit>> = vec![None; k + 1];
    for &a in args {
        for j in (1..=k).rev() {
            let carry = if j == 1 {
                Some(a)
            } else {
                count[j - 1].map(|prev| {
                    let t = Lit::positive(solver.new_var());
                    encode_and(solver, t, &[a, prev]);
                    t
                })
            };
            count[j] = match (count[j], carry) {
                (Some(p), Some(c)) => {
                    // s = p | c
                    let s = Lit::positive(solver.new_var());
                    encode_and(solver, -s, &[-p, -c]);
                    Some(s)
                }
                (p, None) => p,
                (None, c) => c,
            };
        }
    }
    match count[k] {
        Some(lit) => equal(solver, y, lit),
        None => solver.add_clause(&[-y]),
    }
}

/// CNF encoder for subnets and builder fragments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetEncoder<'a> {
    registry: Option<&'a CellTypeRegistry>,
}

impl<'a> SubnetEncoder<'a> {
    pub fn new() -> Self {
        Self { registry: None }
    }

    /// Encoder that inlines the implementation subnets of registered types.
    pub fn with_registry(registry: &'a CellTypeRegistry) -> Self {
        Self {
            registry: Some(registry),
        }
    }

    /// Encodes all cells of a subnet. Inputs already bound in `ctx` keep
    /// their literals, which lets two encodings share inputs.
    pub fn encode_subnet<S: Solver + ?Sized>(
        &self,
        subnet: &Subnet,
        ctx: &mut EncoderContext,
        solver: &mut S,
    ) {
        for (id, _) in subnet.cells() {
            self.encode_cell(subnet, id, ctx, solver);
        }
        debug!(
            "encoded {} cells, {} variables",
            subnet.cell_num(),
            solver.num_vars()
        );
    }

    /// Encodes the given cells (in topological order). Sources outside the
    /// set become free variables.
    pub fn encode_cells<V: CellView, S: Solver + ?Sized>(
        &self,
        view: &V,
        ids: &[EntryId],
        ctx: &mut EncoderContext,
        solver: &mut S,
    ) {
        for &id in ids {
            for link in view.links(id) {
                ctx.lit_or_fresh(link, solver);
            }
            self.encode_cell(view, id, ctx, solver);
        }
    }

    /// Encodes one cell whose sources are already encoded.
    pub fn encode_cell<V: CellView, S: Solver + ?Sized>(
        &self,
        view: &V,
        id: EntryId,
        ctx: &mut EncoderContext,
        solver: &mut S,
    ) {
        if ctx.is_encoded(id) {
            return;
        }
        let cell = view.cell(id);
        let args: Vec<Lit> = view.links(id).iter().map(|&l| ctx.lit(l)).collect();
        let lits = self.encode_function(cell, &args, solver);
        ctx.set(id, lits);
    }

    fn encode_function<S: Solver + ?Sized>(
        &self,
        cell: &Cell,
        args: &[Lit],
        solver: &mut S,
    ) -> Vec<Lit> {
        let fresh = |solver: &mut S| Lit::positive(solver.new_var());
        let y = match cell.symbol() {
            CellSymbol::In => fresh(solver),
            CellSymbol::Zero => {
                let y = fresh(solver);
                solver.add_clause(&[-y]);
                y
            }
            CellSymbol::One => {
                let y = fresh(solver);
                solver.add_clause(&[y]);
                y
            }
            CellSymbol::Buf | CellSymbol::Out => args[0],
            CellSymbol::And | CellSymbol::Or | CellSymbol::Xor if args.len() == 1 => args[0],
            CellSymbol::And => {
                let y = fresh(solver);
                encode_and(solver, y, args);
                y
            }
            CellSymbol::Or => {
                // y = !(!a1 & ... & !an)
                let y = fresh(solver);
                let negated: Vec<Lit> = args.iter().map(|&a| -a).collect();
                encode_and(solver, -y, &negated);
                y
            }
            CellSymbol::Xor => {
                let mut acc = args[0];
                for &a in &args[1..] {
                    let y = fresh(solver);
                    encode_xor2(solver, y, acc, a);
                    acc = y;
                }
                acc
            }
            CellSymbol::Maj => {
                let y = fresh(solver);
                encode_maj(solver, y, args);
                y
            }
            CellSymbol::Undef => return self.encode_custom(cell, args, solver),
        };
        vec![y]
    }

    fn encode_custom<S: Solver + ?Sized>(
        &self,
        cell: &Cell,
        args: &[Lit],
        solver: &mut S,
    ) -> Vec<Lit> {
        let registry = match self.registry {
            Some(r) => r,
            None => panic!("Cell type {} needs a registry", cell.type_id().index()),
        };
        let cell_type = registry.get(cell.type_id());
        let implementation = match cell_type.implementation() {
            Some(subnet) => subnet,
            None => panic!("Cell type {} has no implementation", cell_type.name()),
        };
        let mut inner = EncoderContext::new(implementation.size());
        for (i, &arg) in args.iter().enumerate() {
            inner.set(EntryId::new(i), vec![arg]);
        }
        self.encode_subnet(implementation, &mut inner, solver);
        (0..implementation.out_num())
            .map(|i| inner.lit(Link::new(implementation.out_idx(i))))
            .collect()
    }
}
