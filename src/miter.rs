//! Miter construction: a circuit that outputs 1 exactly when two circuits
//! disagree under a given correspondence of their inputs and outputs.

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::{debug, error};
use thiserror::Error;

use crate::builder::SubnetBuilder;
use crate::celltype::CellSymbol;
use crate::link::Link;
use crate::subnet::Subnet;

/// Side of a comparison.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Side {
    Lhs,
    Rhs,
}

/// Kind of a circuit port.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Port {
    Input,
    Output,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Lhs => write!(f, "left"),
            Side::Rhs => write!(f, "right"),
        }
    }
}

impl Display for Port {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Port::Input => write!(f, "input"),
            Port::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MiterError {
    #[error("input counts differ: {lhs} vs {rhs}")]
    InputCountMismatch { lhs: usize, rhs: usize },
    #[error("output counts differ: {lhs} vs {rhs}")]
    OutputCountMismatch { lhs: usize, rhs: usize },
    #[error("circuits have no outputs")]
    NoOutputs,
    #[error("{side} {port} {index} is out of range")]
    OutOfRange { side: Side, port: Port, index: usize },
    #[error("{side} {port} {index} is not bound")]
    Unbound { side: Side, port: Port, index: usize },
    #[error("{side} {port} {index} is bound more than once")]
    BoundTwice { side: Side, port: Port, index: usize },
    #[error("no {port} with flip-flop tag {tag} on the {side} side")]
    MissingFlipFlop { side: Side, port: Port, tag: u32 },
}

/// Correspondence between the ports of two circuits, as pairs of
/// (left index, right index).
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Binding {
    pub inputs: Vec<(usize, usize)>,
    pub outputs: Vec<(usize, usize)>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds input `i` to input `i` and output `j` to output `j`.
    pub fn identity(n_in: usize, n_out: usize) -> Self {
        Self {
            inputs: (0..n_in).map(|i| (i, i)).collect(),
            outputs: (0..n_out).map(|j| (j, j)).collect(),
        }
    }

    pub fn bind_input(&mut self, lhs: usize, rhs: usize) {
        self.inputs.push((lhs, rhs));
    }

    pub fn bind_output(&mut self, lhs: usize, rhs: usize) {
        self.outputs.push((lhs, rhs));
    }

    /// Pairs flip-flop tagged inputs and outputs: for every `(l, r)` in
    /// `pairs`, the input (output) tagged `l` in `lhs` is bound to the input
    /// (output) tagged `r` in `rhs`.
    pub fn bind_flip_flops(
        &mut self,
        lhs: &Subnet,
        rhs: &Subnet,
        pairs: &[(u32, u32)],
    ) -> Result<(), MiterError> {
        for &(l, r) in pairs {
            let li = find_tagged(lhs, Port::Input, l).ok_or(MiterError::MissingFlipFlop {
                side: Side::Lhs,
                port: Port::Input,
                tag: l,
            })?;
            let ri = find_tagged(rhs, Port::Input, r).ok_or(MiterError::MissingFlipFlop {
                side: Side::Rhs,
                port: Port::Input,
                tag: r,
            })?;
            let lo = find_tagged(lhs, Port::Output, l).ok_or(MiterError::MissingFlipFlop {
                side: Side::Lhs,
                port: Port::Output,
                tag: l,
            })?;
            let ro = find_tagged(rhs, Port::Output, r).ok_or(MiterError::MissingFlipFlop {
                side: Side::Rhs,
                port: Port::Output,
                tag: r,
            })?;
            self.bind_input(li, ri);
            self.bind_output(lo, ro);
        }
        Ok(())
    }
}

fn find_tagged(subnet: &Subnet, port: Port, tag: u32) -> Option<usize> {
    match port {
        Port::Input => (0..subnet.in_num())
            .find(|&i| subnet.cell(subnet.in_link(i).idx()).flip_flop_id() == Some(tag)),
        Port::Output => (0..subnet.out_num())
            .find(|&i| subnet.cell(subnet.out_idx(i)).flip_flop_id() == Some(tag)),
    }
}

fn check_cover(
    pairs: &[(usize, usize)],
    port: Port,
    n: usize,
) -> Result<(), MiterError> {
    let mut seen = [vec![false; n], vec![false; n]];
    for &(l, r) in pairs {
        for (k, (side, index)) in [(Side::Lhs, l), (Side::Rhs, r)].into_iter().enumerate() {
            if index >= n {
                return Err(MiterError::OutOfRange { side, port, index });
            }
            if seen[k][index] {
                return Err(MiterError::BoundTwice { side, port, index });
            }
            seen[k][index] = true;
        }
    }
    for (k, side) in [Side::Lhs, Side::Rhs].into_iter().enumerate() {
        if let Some(index) = seen[k].iter().position(|&b| !b) {
            return Err(MiterError::Unbound { side, port, index });
        }
    }
    Ok(())
}

/// Checks that a miter of `lhs` and `rhs` can be built under `binding`.
pub fn check_miterable(lhs: &Subnet, rhs: &Subnet, binding: &Binding) -> Result<(), MiterError> {
    let result = (|| {
        if lhs.in_num() != rhs.in_num() {
            return Err(MiterError::InputCountMismatch {
                lhs: lhs.in_num(),
                rhs: rhs.in_num(),
            });
        }
        if lhs.out_num() != rhs.out_num() {
            return Err(MiterError::OutputCountMismatch {
                lhs: lhs.out_num(),
                rhs: rhs.out_num(),
            });
        }
        if lhs.out_num() == 0 {
            return Err(MiterError::NoOutputs);
        }
        check_cover(&binding.inputs, Port::Input, lhs.in_num())?;
        check_cover(&binding.outputs, Port::Output, lhs.out_num())
    })();
    if let Err(e) = &result {
        error!("Cannot build a miter: {}", e);
    }
    result
}

/// Builds the miter into a fresh builder.
///
/// Miter input `i` is input `i` of `lhs`; its single output is the OR of
/// the XORs of the bound output pairs.
pub fn build_miter(
    lhs: &Subnet,
    rhs: &Subnet,
    binding: &Binding,
) -> Result<SubnetBuilder, MiterError> {
    check_miterable(lhs, rhs, binding)?;

    let mut builder = SubnetBuilder::new();
    let inputs = builder.add_inputs(lhs.in_num());
    let mut rhs_inputs = vec![Link::default(); rhs.in_num()];
    for &(l, r) in &binding.inputs {
        rhs_inputs[r] = inputs[l];
    }

    let lhs_outputs = builder.add_subnet(lhs, &inputs);
    let rhs_outputs = builder.add_subnet(rhs, &rhs_inputs);

    let diffs: Vec<Link> = binding
        .outputs
        .iter()
        .map(|&(l, r)| builder.add_cell(CellSymbol::Xor, &[lhs_outputs[l], rhs_outputs[r]]))
        .collect();
    let diff = if diffs.len() == 1 {
        diffs[0]
    } else {
        builder.add_cell_tree(CellSymbol::Or, &diffs, crate::cell::IN_PLACE_LINKS)
    };
    builder.add_output(diff);

    debug!(
        "miter: {} inputs, {} compared outputs, {} cells",
        builder.in_num(),
        diffs.len(),
        builder.cell_num()
    );
    Ok(builder)
}

/// Builds and finalizes the miter of `lhs` and `rhs`.
pub fn miter(lhs: &Subnet, rhs: &Subnet, binding: &Binding) -> Result<Rc<Subnet>, MiterError> {
    Ok(build_miter(lhs, rhs, binding)?.make(false))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::simulator::Simulator;

    fn adder() -> Rc<Subnet> {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(3);
        let s = builder.add_cell(CellSymbol::Xor, &x);
        let c = builder.add_cell(CellSymbol::Maj, &x);
        builder.add_outputs(&[s, c]);
        builder.make(false)
    }

    /// Same function, different structure and swapped outputs.
    fn adder_swapped() -> Rc<Subnet> {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(3);
        let ab = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let ac = builder.add_cell(CellSymbol::And, &[x[0], x[2]]);
        let bc = builder.add_cell(CellSymbol::And, &[x[1], x[2]]);
        let c = builder.add_cell(CellSymbol::Or, &[ab, ac, bc]);
        let t = builder.add_cell(CellSymbol::Xor, &[x[0], x[1]]);
        let s = builder.add_cell(CellSymbol::Xor, &[t, x[2]]);
        builder.add_outputs(&[c, s]);
        builder.make(false)
    }

    #[test]
    fn test_identical_miter_is_zero() {
        let lhs = adder();
        let m = miter(&lhs, &lhs, &Binding::identity(3, 2)).unwrap();
        println!("{}", m);
        assert_eq!(m.in_num(), 3);
        assert_eq!(m.out_num(), 1);
        let tables = Simulator::new(&m).truth_tables();
        assert_eq!(tables, vec![vec![0]]);
    }

    #[test]
    fn test_miter_with_swapped_outputs() {
        let lhs = adder();
        let rhs = adder_swapped();
        let mut binding = Binding::new();
        for i in 0..3 {
            binding.bind_input(i, i);
        }
        binding.bind_output(0, 1);
        binding.bind_output(1, 0);
        let m = miter(&lhs, &rhs, &binding).unwrap();
        assert_eq!(Simulator::new(&m).truth_tables(), vec![vec![0]]);

        // The identity binding compares sum with carry.
        let m = miter(&lhs, &rhs, &Binding::identity(3, 2)).unwrap();
        assert_ne!(Simulator::new(&m).truth_tables(), vec![vec![0]]);
    }

    #[test]
    fn test_miter_input_correspondence() {
        // lhs = x0 & !x1, rhs = !y0 & y1: equal when inputs are crossed.
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], !x[1]]);
        builder.add_output(a);
        let lhs = builder.make(false);

        let mut builder = SubnetBuilder::new();
        let y = builder.add_inputs(2);
        let b = builder.add_cell(CellSymbol::And, &[!y[0], y[1]]);
        builder.add_output(b);
        let rhs = builder.make(false);

        let crossed = Binding {
            inputs: vec![(0, 1), (1, 0)],
            outputs: vec![(0, 0)],
        };
        let m = miter(&lhs, &rhs, &crossed).unwrap();
        assert_eq!(Simulator::new(&m).truth_tables(), vec![vec![0]]);

        let m = miter(&lhs, &rhs, &Binding::identity(2, 1)).unwrap();
        let mut sim = Simulator::new(&m);
        // Differ on (1, 0) and (0, 1).
        assert_eq!(sim.evaluate(&[true, false]), vec![true]);
        assert_eq!(sim.evaluate(&[false, true]), vec![true]);
        assert_eq!(sim.evaluate(&[true, true]), vec![false]);
    }

    #[test]
    fn test_miter_errors() {
        let lhs = adder();
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &x);
        builder.add_outputs(&[a, a]);
        let small = builder.make(false);

        assert_eq!(
            check_miterable(&lhs, &small, &Binding::identity(3, 2)),
            Err(MiterError::InputCountMismatch { lhs: 3, rhs: 2 })
        );

        let partial = Binding {
            inputs: vec![(0, 0), (1, 1)],
            outputs: vec![(0, 0), (1, 1)],
        };
        assert_eq!(
            check_miterable(&lhs, &lhs, &partial),
            Err(MiterError::Unbound {
                side: Side::Lhs,
                port: Port::Input,
                index: 2
            })
        );

        let twice = Binding {
            inputs: vec![(0, 0), (1, 1), (2, 1)],
            outputs: vec![(0, 0), (1, 1)],
        };
        assert_eq!(
            check_miterable(&lhs, &lhs, &twice),
            Err(MiterError::BoundTwice {
                side: Side::Rhs,
                port: Port::Input,
                index: 1
            })
        );

        let out_of_range = Binding {
            inputs: vec![(0, 0), (1, 1), (2, 2)],
            outputs: vec![(0, 0), (1, 5)],
        };
        let err = build_miter(&lhs, &lhs, &out_of_range).unwrap_err();
        assert_eq!(err.to_string(), "right output 5 is out of range");
    }

    #[test]
    fn test_bind_flip_flops() {
        let make = |tag: u32, inv: bool| {
            let mut builder = SubnetBuilder::new();
            let x = builder.add_input();
            let q = builder.add_flip_flop_input(tag);
            let d = builder.add_cell(CellSymbol::Xor, &[x, q]);
            builder.add_output(d);
            builder.add_flip_flop_output(d.xor_inv(inv), tag);
            builder.make(false)
        };
        let lhs = make(7, false);
        let rhs = make(3, false);
        let mut binding = Binding::new();
        binding.bind_input(0, 0);
        binding.bind_output(0, 0);
        binding.bind_flip_flops(&lhs, &rhs, &[(7, 3)]).unwrap();
        assert_eq!(binding.inputs, vec![(0, 0), (1, 1)]);
        assert_eq!(binding.outputs, vec![(0, 0), (1, 1)]);
        let m = miter(&lhs, &rhs, &binding).unwrap();
        assert_eq!(Simulator::new(&m).truth_tables(), vec![vec![0]]);

        let err = binding.bind_flip_flops(&lhs, &rhs, &[(3, 3)]).unwrap_err();
        assert_eq!(
            err,
            MiterError::MissingFlipFlop {
                side: Side::Lhs,
                port: Port::Input,
                tag: 3
            }
        );

        let inverted = make(3, true);
        let mut binding = Binding::identity(2, 0);
        binding.bind_output(0, 0);
        binding.bind_output(1, 1);
        let m = miter(&lhs, &inverted, &binding).unwrap();
        assert_ne!(Simulator::new(&m).truth_tables(), vec![vec![0]]);
    }
}
