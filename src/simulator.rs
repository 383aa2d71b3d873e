//! Bit-parallel simulation: every `u64` word carries 64 input patterns.

use crate::builder::SubnetBuilder;
use crate::cell::Cell;
use crate::celltype::{CellSymbol, CellTypeRegistry};
use crate::link::Link;
use crate::subnet::Subnet;

const PATTERNS: [u64; 6] = [
    0xAAAA_AAAA_AAAA_AAAA,
    0xCCCC_CCCC_CCCC_CCCC,
    0xF0F0_F0F0_F0F0_F0F0,
    0xFF00_FF00_FF00_FF00,
    0xFFFF_0000_FFFF_0000,
    0xFFFF_FFFF_0000_0000,
];

/// Number of 64-pattern words needed to enumerate all assignments of `n_in` inputs.
pub fn exhaustive_words(n_in: usize) -> usize {
    assert!(n_in < 64, "Too many inputs for exhaustive simulation");
    if n_in <= 6 {
        1
    } else {
        1 << (n_in - 6)
    }
}

/// Value of `input` in the `word`-th word of exhaustive enumeration.
///
/// Pattern `p` of word `w` is assignment number `64 * w + p`, whose bit `i`
/// is the value of input `i`.
pub fn exhaustive_pattern(n_in: usize, input: usize, word: usize) -> u64 {
    assert!(input < n_in, "Input {} is out of range", input);
    if input < 6 {
        PATTERNS[input]
    } else if (word >> (input - 6)) & 1 == 1 {
        u64::MAX
    } else {
        0
    }
}

/// Mask of the meaningful patterns in a word of exhaustive enumeration.
pub fn valid_mask(n_in: usize) -> u64 {
    if n_in >= 6 {
        u64::MAX
    } else {
        (1u64 << (1 << n_in)) - 1
    }
}

/// Assignment with the given number in exhaustive enumeration.
pub fn assignment(n_in: usize, index: usize) -> Vec<bool> {
    (0..n_in).map(|i| (index >> i) & 1 == 1).collect()
}

fn majority(values: &[u64]) -> u64 {
    if let [a, b, c] = values {
        return (a & b) | (a & c) | (b & c);
    }
    let threshold = values.len() / 2;
    let mut result = 0;
    for bit in 0..64 {
        let ones = values.iter().filter(|&&v| (v >> bit) & 1 == 1).count();
        if ones > threshold {
            result |= 1 << bit;
        }
    }
    result
}

fn value_of(values: &[u64], offsets: &[usize], link: Link) -> u64 {
    let value = values[offsets[link.idx().index()] + link.out() as usize];
    if link.inv() {
        !value
    } else {
        value
    }
}

/// Evaluates a builtin cell over one word of patterns.
fn eval_builtin(cell: &Cell, args: &[u64]) -> u64 {
    match cell.symbol() {
        CellSymbol::Zero => 0,
        CellSymbol::One => u64::MAX,
        CellSymbol::Buf | CellSymbol::Out => args[0],
        CellSymbol::And => args.iter().fold(u64::MAX, |acc, &v| acc & v),
        CellSymbol::Or => args.iter().fold(0, |acc, &v| acc | v),
        CellSymbol::Xor => args.iter().fold(0, |acc, &v| acc ^ v),
        CellSymbol::Maj => majority(args),
        CellSymbol::In | CellSymbol::Undef => unreachable!("{} is not a builtin function", cell.symbol()),
    }
}

/// Simulator bound to one subnet.
///
/// Every cell output gets a state slot; multi-output cells of registered
/// types get one slot per output.
pub struct Simulator<'a> {
    subnet: &'a Subnet,
    registry: Option<&'a CellTypeRegistry>,
    offsets: Vec<usize>,
    state: Vec<u64>,
}

impl<'a> Simulator<'a> {
    /// Simulator for a subnet made of builtin cells.
    pub fn new(subnet: &'a Subnet) -> Self {
        Self::build(subnet, None)
    }

    /// Simulator for a subnet that may contain registered cell types with
    /// an implementation subnet.
    pub fn with_registry(subnet: &'a Subnet, registry: &'a CellTypeRegistry) -> Self {
        Self::build(subnet, Some(registry))
    }

    fn build(subnet: &'a Subnet, registry: Option<&'a CellTypeRegistry>) -> Self {
        let mut offsets = vec![0; subnet.size()];
        let mut size = 0;
        for (id, cell) in subnet.cells() {
            offsets[id.index()] = size;
            size += if cell.type_id().is_builtin() {
                1
            } else {
                match registry {
                    Some(r) => r.get(cell.type_id()).out_num().max(1) as usize,
                    None => panic!("Cell type {} needs a registry", cell.type_id().index()),
                }
            };
        }
        Self {
            subnet,
            registry,
            offsets,
            state: vec![0; size],
        }
    }

    /// Simulates one word of patterns; `inputs[i]` holds the values of input `i`.
    pub fn simulate(&mut self, inputs: &[u64]) {
        assert_eq!(
            inputs.len(),
            self.subnet.in_num(),
            "Expected {} input words",
            self.subnet.in_num()
        );
        let subnet = self.subnet;
        for (id, cell) in subnet.cells() {
            let offset = self.offsets[id.index()];
            if cell.is_in() {
                self.state[offset] = inputs[id.index()];
                continue;
            }
            let args: Vec<u64> = subnet
                .links(id)
                .iter()
                .map(|&l| value_of(&self.state, &self.offsets, l))
                .collect();
            if cell.type_id().is_builtin() {
                self.state[offset] = eval_builtin(cell, &args);
            } else {
                let outputs = self.eval_custom(cell, &args);
                self.state[offset..offset + outputs.len()].copy_from_slice(&outputs);
            }
        }
    }

    fn eval_custom(&self, cell: &Cell, args: &[u64]) -> Vec<u64> {
        let registry = match self.registry {
            Some(r) => r,
            None => panic!("Cell type {} needs a registry", cell.type_id().index()),
        };
        let cell_type = registry.get(cell.type_id());
        let implementation = match cell_type.implementation() {
            Some(subnet) => subnet,
            None => panic!("Cell type {} has no implementation", cell_type.name()),
        };
        let mut inner = Simulator::with_registry(implementation, registry);
        inner.simulate(args);
        inner.outputs()
    }

    /// Value of a link after the last simulation.
    pub fn value(&self, link: Link) -> u64 {
        value_of(&self.state, &self.offsets, link)
    }

    /// Value of output `i` after the last simulation.
    pub fn output(&self, i: usize) -> u64 {
        self.value(Link::new(self.subnet.out_idx(i)))
    }

    pub fn outputs(&self) -> Vec<u64> {
        (0..self.subnet.out_num()).map(|i| self.output(i)).collect()
    }

    /// Evaluates a single input assignment.
    pub fn evaluate(&mut self, inputs: &[bool]) -> Vec<bool> {
        let words: Vec<u64> = inputs.iter().map(|&b| if b { u64::MAX } else { 0 }).collect();
        self.simulate(&words);
        self.outputs().iter().map(|&w| w & 1 == 1).collect()
    }

    /// Exhaustive truth tables: one vector of words per output, patterns
    /// beyond the `2^n` meaningful ones cleared.
    pub fn truth_tables(&mut self) -> Vec<Vec<u64>> {
        let n_in = self.subnet.in_num();
        let mask = valid_mask(n_in);
        let words = exhaustive_words(n_in);
        let mut tables = vec![Vec::with_capacity(words); self.subnet.out_num()];
        for word in 0..words {
            let inputs: Vec<u64> = (0..n_in)
                .map(|i| exhaustive_pattern(n_in, i, word))
                .collect();
            self.simulate(&inputs);
            for (table, value) in tables.iter_mut().zip(self.outputs()) {
                table.push(value & mask);
            }
        }
        tables
    }
}

/// Simulates a live builder over several words at once.
///
/// `inputs[i]` holds the words of the `i`-th input in order. Returns the
/// words of every entry, indexed by entry id (empty for free slots).
///
/// # Panics
///
/// Panics on cells of registered types.
pub fn simulate_builder(builder: &SubnetBuilder, inputs: &[Vec<u64>]) -> Vec<Vec<u64>> {
    assert_eq!(
        inputs.len(),
        builder.in_num(),
        "Expected words for {} inputs",
        builder.in_num()
    );
    let words = inputs.first().map_or(1, |w| w.len());
    let mut values: Vec<Vec<u64>> = vec![Vec::new(); builder.max_idx()];
    let mut next_input = 0;
    for id in builder.iter() {
        let cell = builder.cell(id);
        if cell.is_in() {
            values[id.index()] = inputs[next_input].clone();
            next_input += 1;
            continue;
        }
        assert!(
            cell.type_id().is_builtin(),
            "Builder simulation supports builtin cells only"
        );
        let links = builder.links(id);
        let mut result = vec![0; words];
        let mut args = vec![0; links.len()];
        for (w, slot) in result.iter_mut().enumerate() {
            for (arg, link) in args.iter_mut().zip(&links) {
                let v = values[link.idx().index()][w];
                *arg = if link.inv() { !v } else { v };
            }
            *slot = eval_builtin(cell, &args);
        }
        values[id.index()] = result;
    }
    values
}

/// Value of `link` over the words produced by [`simulate_builder`].
pub fn link_words(values: &[Vec<u64>], link: Link) -> Vec<u64> {
    values[link.idx().index()]
        .iter()
        .map(|&v| if link.inv() { !v } else { v })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use test_log::test;

    use super::*;
    use crate::celltype::{CellType, CellTypeId};

    #[test]
    fn test_exhaustive_patterns() {
        assert_eq!(exhaustive_words(3), 1);
        assert_eq!(exhaustive_words(8), 4);
        assert_eq!(valid_mask(2), 0xF);
        assert_eq!(valid_mask(6), u64::MAX);
        assert_eq!(exhaustive_pattern(8, 0, 3), PATTERNS[0]);
        assert_eq!(exhaustive_pattern(8, 6, 1), u64::MAX);
        assert_eq!(exhaustive_pattern(8, 7, 1), 0);
        assert_eq!(exhaustive_pattern(8, 7, 2), u64::MAX);
        // Pattern 5 of word 0 is assignment 0b101.
        let bits: Vec<bool> = (0..3).map(|i| (exhaustive_pattern(3, i, 0) >> 5) & 1 == 1).collect();
        assert_eq!(bits, assignment(3, 5));
    }

    #[test]
    fn test_simulate_gates() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(3);
        let and = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let or = builder.add_cell(CellSymbol::Or, &[x[0], !x[1]]);
        let xor = builder.add_cell(CellSymbol::Xor, &x);
        let maj = builder.add_cell(CellSymbol::Maj, &x);
        let one = builder.add_cell(CellSymbol::One, &[]);
        builder.add_outputs(&[and, or, xor, maj, !one]);
        let subnet = builder.make(false);

        let mut sim = Simulator::new(&subnet);
        let tables = sim.truth_tables();
        println!("{:x?}", tables);
        assert_eq!(tables[0], vec![0x88]);
        assert_eq!(tables[1], vec![0xBB]);
        assert_eq!(tables[2], vec![0x96]);
        assert_eq!(tables[3], vec![0xE8]);
        assert_eq!(tables[4], vec![0x00]);

        assert_eq!(
            sim.evaluate(&[true, false, true]),
            vec![false, true, false, true, false]
        );
    }

    #[test]
    fn test_wide_majority() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(5);
        let maj = builder.add_cell(CellSymbol::Maj, &x);
        builder.add_output(maj);
        let subnet = builder.make(false);
        let mut sim = Simulator::new(&subnet);
        for index in 0..32 {
            let inputs = assignment(5, index);
            let ones = inputs.iter().filter(|&&b| b).count();
            assert_eq!(sim.evaluate(&inputs), vec![ones >= 3]);
        }
    }

    #[test]
    fn test_custom_cell() {
        // Half adder: (sum, carry)
        let mut impl_builder = SubnetBuilder::new();
        let y = impl_builder.add_inputs(2);
        let s = impl_builder.add_cell(CellSymbol::Xor, &y);
        let c = impl_builder.add_cell(CellSymbol::And, &y);
        impl_builder.add_outputs(&[s, c]);
        let implementation: Rc<Subnet> = impl_builder.make(false);

        let mut registry = CellTypeRegistry::new();
        let ha = registry.register(CellType::new("HA", 2, 2).with_implementation(implementation));
        assert_ne!(ha, CellTypeId::AND);

        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let outs = builder.add_multi_output_cell(&registry, ha, &x);
        let t = builder.add_cell(CellSymbol::Or, &[outs[0], outs[1]]);
        builder.add_outputs(&[outs[0], !outs[1], t]);
        let subnet = builder.make(false);
        assert!(subnet.has_custom_cells());

        let mut sim = Simulator::with_registry(&subnet, &registry);
        let tables = sim.truth_tables();
        assert_eq!(tables, vec![vec![0x6], vec![0x7], vec![0xE]]);
    }

    #[test]
    #[should_panic(expected = "has no implementation")]
    fn test_custom_cell_without_implementation() {
        let mut registry = CellTypeRegistry::new();
        let t = registry.register(CellType::new("BLACKBOX", 1, 1));
        let mut builder = SubnetBuilder::new();
        let x = builder.add_input();
        let y = builder.add_typed_cell(&registry, t, &[x]);
        builder.add_output(y);
        let subnet = builder.make(false);
        Simulator::with_registry(&subnet, &registry).evaluate(&[true]);
    }

    #[test]
    fn test_simulate_builder() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], !x[1]]);
        builder.add_output(!a);
        let values = simulate_builder(&builder, &[vec![0b1100, 0], vec![0b1010, u64::MAX]]);
        assert_eq!(values[a.idx().index()], vec![0b0100, 0]);
        assert_eq!(link_words(&values, !a)[0] & 0xF, 0b1011);
    }
}
