//! Reduced ordered binary decision diagrams with complement edges.
//!
//! Nodes are hash-consed in a [`Table`], so two handles are equal exactly
//! when they denote the same function. Only the high edge of a stored node
//! is ever regular; complement flags live on handles and low edges.
//!
//! Variables are numbered from 1; smaller numbers are closer to the root.

use std::cell::RefCell;
use std::cmp::min;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Debug;

use log::debug;

use crate::cache::Cache;
use crate::reference::Ref;
use crate::table::{pairing3, Table, TableHash};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    /// `0` for the terminal.
    variable: u32,
    low: Ref,
    high: Ref,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            variable: 0,
            low: Ref::positive(0),
            high: Ref::positive(0),
        }
    }
}

impl TableHash for Node {
    fn table_hash(&self) -> u64 {
        pairing3(self.variable as u64, self.low.key(), self.high.key())
    }
}

/// Normalized ITE arguments: `f` and `g` are regular.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct IteKey(Ref, Ref, Ref);

impl TableHash for IteKey {
    fn table_hash(&self) -> u64 {
        pairing3(self.0.key(), self.1.key(), self.2.key())
    }
}

enum Step {
    Done(Ref),
    Expand { f: Ref, g: Ref, h: Ref, negate: bool },
}

enum Frame {
    Call(Ref, Ref, Ref),
    Join { key: IteKey, variable: u32, negate: bool },
}

pub struct Bdd {
    storage: RefCell<Table<Node>>,
    cache: RefCell<Cache<IteKey, Ref>>,
    pub zero: Ref,
    pub one: Ref,
}

impl Bdd {
    /// Create a manager with `2^bits` initial unique-table buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bits should be in the range 0..=31");

        let mut storage = Table::new(bits);
        let one = storage.add(Node::default());
        assert_eq!(one, 1);
        let one = Ref::positive(one as u32);

        Self {
            storage: RefCell::new(storage),
            cache: RefCell::new(Cache::new(min(bits, 16))),
            zero: -one,
            one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new(12)
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.borrow();
        f.debug_struct("Bdd")
            .field("nodes", &storage.len())
            .field("buckets", &storage.num_buckets())
            .finish()
    }
}

impl Bdd {
    pub fn cache(&self) -> std::cell::Ref<'_, Cache<IteKey, Ref>> {
        self.cache.borrow()
    }

    /// Number of nodes ever created, the terminal included.
    pub fn num_nodes(&self) -> usize {
        self.storage.borrow().len()
    }

    /// Variable of the node; `0` for the terminal.
    pub fn variable(&self, node: Ref) -> u32 {
        self.storage.borrow()[node.index()].variable
    }

    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.storage.borrow()[node.index()].low;
        if node.is_negated() {
            -low
        } else {
            low
        }
    }
    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.storage.borrow()[node.index()].high;
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }
    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }
    pub fn is_terminal(&self, node: Ref) -> bool {
        node.index() == self.one.index()
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        if low == high {
            return low;
        }

        // Keep the high edge regular.
        let (low, high, negate) = if high.is_negated() {
            (-low, -high, true)
        } else {
            (low, high, false)
        };

        let i = self.storage.borrow_mut().put(Node {
            variable: v,
            low,
            high,
        });
        let res = Ref::positive(i as u32);
        if negate {
            -res
        } else {
            res
        }
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");
        self.mk_node(v, self.zero, self.one)
    }

    /// Cofactors of `node` with respect to `v`, which must not be below the
    /// top variable of `node`.
    pub fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        assert_ne!(v, 0, "Variable index should not be zero");

        if self.is_terminal(node) || v < self.variable(node) {
            return (node, node);
        }
        assert_eq!(v, self.variable(node));
        (self.low_node(node), self.high_node(node))
    }

    /// Terminal cases and standard triples of ITE.
    fn ite_normalize(&self, f: Ref, g: Ref, h: Ref) -> Step {
        let (mut f, mut g, mut h) = (f, g, h);
        loop {
            // Terminal cases: constant selector, equal branches, or
            // constant branches that reduce to the selector itself.
            if self.is_one(f) {
                return Step::Done(g);
            }
            if self.is_zero(f) {
                return Step::Done(h);
            }
            if g == h {
                return Step::Done(g);
            }
            if self.is_one(g) && self.is_zero(h) {
                return Step::Done(f);
            }
            if self.is_zero(g) && self.is_one(h) {
                return Step::Done(-f);
            }

            // A branch equal to the selector (or its complement) is a constant.
            if g == f {
                g = self.one;
                continue;
            }
            if g == -f {
                g = self.zero;
                continue;
            }
            if h == f {
                h = self.zero;
                continue;
            }
            if h == -f {
                h = self.one;
                continue;
            }

            // OR/AND/implication/XOR-shaped triples are symmetric in two
            // arguments; keep the argument with the lowest top variable as f.
            let i = self.variable(f);
            let j = self.variable(g);
            let k = self.variable(h);
            if self.is_one(g) && k != 0 && k < i {
                std::mem::swap(&mut f, &mut h);
                continue;
            }
            if self.is_zero(h) && j != 0 && j < i {
                std::mem::swap(&mut f, &mut g);
                continue;
            }
            if self.is_one(h) && j != 0 && j < i {
                (f, g) = (-g, -f);
                continue;
            }
            if self.is_zero(g) && k != 0 && k < i {
                (f, h) = (-h, -f);
                continue;
            }
            if g == -h && j != 0 && j < i {
                (f, g, h) = (g, f, -f);
                continue;
            }
            break;
        }

        // Regular selector.
        if f.is_negated() {
            f = -f;
            std::mem::swap(&mut g, &mut h);
        }
        // Regular then-branch; the result is complemented instead.
        let negate = g.is_negated();
        if negate {
            g = -g;
            h = -h;
        }
        Step::Expand { f, g, h, negate }
    }

    /// If-then-else over three diagrams.
    ///
    /// ```text
    /// ITE(x, y, z) = (x ∧ y) ∨ (¬x ∧ z)
    /// ```
    ///
    /// The recursion runs on an explicit stack.
    ///
    /// # Examples
    ///
    /// ```
    /// use gate_rs::bdd::Bdd;
    ///
    /// let bdd = Bdd::default();
    /// let x = bdd.mk_var(1);
    /// let y = bdd.mk_var(2);
    /// let z = bdd.mk_var(3);
    /// let f = bdd.apply_ite(x, y, z);
    /// assert_eq!(f, bdd.mk_node(1, z, y));
    /// let x_and_y = bdd.apply_and(x, y);
    /// let not_x_and_z = bdd.apply_and(-x, z);
    /// assert_eq!(f, bdd.apply_or(x_and_y, not_x_and_z));
    /// ```
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        let mut stack = vec![Frame::Call(f, g, h)];
        let mut results: Vec<Ref> = Vec::new();

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Call(f, g, h) => match self.ite_normalize(f, g, h) {
                    Step::Done(res) => results.push(res),
                    Step::Expand { f, g, h, negate } => {
                        let key = IteKey(f, g, h);
                        let cached = self.cache.borrow().get(&key).copied();
                        if let Some(res) = cached {
                            results.push(if negate { -res } else { res });
                            continue;
                        }

                        let m = [f, g, h]
                            .iter()
                            .map(|&r| self.variable(r))
                            .filter(|&v| v != 0)
                            .min()
                            .unwrap_or(0);
                        assert_ne!(m, 0);

                        let (f0, f1) = self.top_cofactors(f, m);
                        let (g0, g1) = self.top_cofactors(g, m);
                        let (h0, h1) = self.top_cofactors(h, m);

                        stack.push(Frame::Join {
                            key,
                            variable: m,
                            negate,
                        });
                        stack.push(Frame::Call(f1, g1, h1));
                        stack.push(Frame::Call(f0, g0, h0));
                    }
                },
                Frame::Join {
                    key,
                    variable,
                    negate,
                } => {
                    let (Some(t), Some(e)) = (results.pop(), results.pop()) else {
                        panic!("ITE result stack underflow");
                    };
                    let res = self.mk_node(variable, e, t);
                    self.cache.borrow_mut().insert(key, res);
                    results.push(if negate { -res } else { res });
                }
            }
        }

        match results.pop() {
            Some(res) if results.is_empty() => {
                debug!("apply_ite(f = {}, g = {}, h = {}) -> {}", f, g, h, res);
                res
            }
            _ => panic!("ITE result stack is unbalanced"),
        }
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, -v, v)
    }

    pub fn apply_eq(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, -v)
    }

    /// Majority of three.
    pub fn apply_maj(&self, u: Ref, v: Ref, w: Ref) -> Ref {
        let either = self.apply_or(v, w);
        let both = self.apply_and(v, w);
        self.apply_ite(u, either, both)
    }

    /// Indices of all nodes reachable from `nodes`, the terminal included.
    pub fn descendants(&self, nodes: impl IntoIterator<Item = Ref>) -> HashSet<usize> {
        let mut visited = HashSet::new();
        visited.insert(self.one.index());
        let mut stack: Vec<Ref> = nodes.into_iter().collect();
        while let Some(node) = stack.pop() {
            if visited.insert(node.index()) {
                stack.push(self.low_node(node));
                stack.push(self.high_node(node));
            }
        }
        visited
    }

    /// Number of nodes in the diagram of `f`, the terminal included.
    pub fn size(&self, f: Ref) -> usize {
        self.descendants([f]).len()
    }

    /// Variables `f` depends on.
    pub fn support(&self, f: Ref) -> BTreeSet<u32> {
        self.descendants([f])
            .into_iter()
            .filter(|&i| i != self.one.index())
            .map(|i| self.variable(Ref::positive(i as u32)))
            .collect()
    }

    /// Evaluates `f` under `values`, where variable `v` takes `values[v - 1]`.
    pub fn eval(&self, f: Ref, values: &[bool]) -> bool {
        let mut node = f;
        while !self.is_terminal(node) {
            let v = self.variable(node) as usize;
            node = if values[v - 1] {
                self.high_node(node)
            } else {
                self.low_node(node)
            };
        }
        self.is_one(node)
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        if self.is_zero(node) {
            return "(0)".to_string();
        } else if self.is_one(node) {
            return "(1)".to_string();
        }

        format!(
            "{}:(x{}, {}, {})",
            node,
            self.variable(node),
            self.to_bracket_string(self.high_node(node)),
            self.to_bracket_string(self.low_node(node))
        )
    }
}
