//! # gate-rs: gate-level circuits and equivalence checking
//!
//! **`gate-rs`** is a small toolkit for combinational (and flip-flop cut) circuits.
//! Circuits are stored as flat, topologically ordered cell arrays and are built through a
//! mutable builder that keeps them structurally hashed.
//!
//! ## Key Features
//!
//! - **Compact storage**: A [`Subnet`][crate::subnet::Subnet] is an immutable array of entries.
//!   Inputs come first, outputs last, and a cell only refers to entries before it.
//! - **Structural hashing**: [`SubnetBuilder`][crate::builder::SubnetBuilder] merges equal
//!   cells on the fly (commutative arguments are sorted) and keeps cells in depth order.
//! - **Rewriting**: Fragments can be replaced in place, and their effect can be evaluated
//!   beforehand (see [`rewrite`]).
//! - **Equivalence checking**: Miters are checked by simulation, SAT, FRAIG sweeping or
//!   a cut/BDD hybrid (see [`checker`]).
//!
//! ## Basic Usage
//!
//! ```rust
//! use gate_rs::builder::SubnetBuilder;
//! use gate_rs::celltype::CellSymbol;
//! use gate_rs::checker::{Checker, Strategy};
//! use gate_rs::miter::Binding;
//!
//! // f = x0 AND x1
//! let mut builder = SubnetBuilder::new();
//! let x = builder.add_inputs(2);
//! let f = builder.add_cell(CellSymbol::And, &x);
//! builder.add_output(f);
//! let lhs = builder.make(false);
//!
//! // g = NOT (NOT x1 OR NOT x0)
//! let mut builder = SubnetBuilder::new();
//! let x = builder.add_inputs(2);
//! let g = builder.add_cell(CellSymbol::Or, &[!x[1], !x[0]]);
//! builder.add_output(!g);
//! let rhs = builder.make(false);
//!
//! for strategy in Strategy::ALL {
//!     let result = strategy.checker().are_equal(&lhs, &rhs, &Binding::identity(2, 1));
//!     assert!(result.is_equal());
//! }
//! ```
//!
//! ## Core Components
//!
//! - **[`subnet`]** and **[`builder`]**: circuit storage and construction.
//! - **[`miter`]**: joining two circuits into a single-output miter.
//! - **[`checker`]**: the equivalence engine.
//! - **[`bdd`]**, **[`encoder`]**, **[`simulator`]**: the reasoning back ends.

pub mod bdd;
pub mod builder;
pub mod cache;
pub mod cell;
pub mod celltype;
pub mod checker;
pub mod encoder;
pub mod link;
pub mod miter;
pub mod reference;
pub mod rewrite;
pub mod sat;
pub mod simulator;
pub mod solver;
pub mod subnet;
pub mod table;
pub mod types;
