//! Cell types: builtin gate symbols and the explicit type registry.
//!
//! Negative gates (NOT, NAND, NOR, XNOR) are not cell types here: they are
//! expressed through inverted [`Link`][crate::link::Link]s.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::subnet::Subnet;

/// Function symbol of a cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CellSymbol {
    In,
    Out,
    Zero,
    One,
    Buf,
    And,
    Or,
    Xor,
    Maj,
    /// Library or custom cell, described by its [`CellType`].
    Undef,
}

impl CellSymbol {
    pub const fn name(self) -> &'static str {
        match self {
            CellSymbol::In => "IN",
            CellSymbol::Out => "OUT",
            CellSymbol::Zero => "ZERO",
            CellSymbol::One => "ONE",
            CellSymbol::Buf => "BUF",
            CellSymbol::And => "AND",
            CellSymbol::Or => "OR",
            CellSymbol::Xor => "XOR",
            CellSymbol::Maj => "MAJ",
            CellSymbol::Undef => "UNDEF",
        }
    }

    /// Operand order does not matter.
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            CellSymbol::And | CellSymbol::Or | CellSymbol::Xor | CellSymbol::Maj
        )
    }

    /// Operands may be regrouped into a tree of smaller cells.
    pub const fn is_regroupable(self) -> bool {
        matches!(self, CellSymbol::And | CellSymbol::Or | CellSymbol::Xor)
    }

    /// Number of inputs, or `None` for variadic symbols.
    pub const fn fixed_arity(self) -> Option<usize> {
        match self {
            CellSymbol::In | CellSymbol::Zero | CellSymbol::One => Some(0),
            CellSymbol::Out | CellSymbol::Buf => Some(1),
            _ => None,
        }
    }
}

impl Display for CellSymbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Opaque handle into a [`CellTypeRegistry`].
///
/// Builtin symbols have fixed ids, so cells of builtin types can be
/// created and interpreted without a registry.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellTypeId(u16);

impl CellTypeId {
    pub const IN: CellTypeId = CellTypeId(0);
    pub const OUT: CellTypeId = CellTypeId(1);
    pub const ZERO: CellTypeId = CellTypeId(2);
    pub const ONE: CellTypeId = CellTypeId(3);
    pub const BUF: CellTypeId = CellTypeId(4);
    pub const AND: CellTypeId = CellTypeId(5);
    pub const OR: CellTypeId = CellTypeId(6);
    pub const XOR: CellTypeId = CellTypeId(7);
    pub const MAJ: CellTypeId = CellTypeId(8);

    const BUILTIN: [CellSymbol; 9] = [
        CellSymbol::In,
        CellSymbol::Out,
        CellSymbol::Zero,
        CellSymbol::One,
        CellSymbol::Buf,
        CellSymbol::And,
        CellSymbol::Or,
        CellSymbol::Xor,
        CellSymbol::Maj,
    ];

    /// Id of the builtin type with the given symbol.
    ///
    /// # Panics
    ///
    /// Panics on [`CellSymbol::Undef`], which has no builtin type.
    pub fn of(symbol: CellSymbol) -> Self {
        let index = Self::BUILTIN.iter().position(|&s| s == symbol);
        match index {
            Some(i) => CellTypeId(i as u16),
            None => panic!("Symbol {} has no builtin cell type", symbol),
        }
    }

    /// Symbol of a builtin type, [`CellSymbol::Undef`] for registered ones.
    pub fn symbol(self) -> CellSymbol {
        Self::BUILTIN
            .get(self.0 as usize)
            .copied()
            .unwrap_or(CellSymbol::Undef)
    }

    pub fn is_builtin(self) -> bool {
        (self.0 as usize) < Self::BUILTIN.len()
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Physical attributes of a mapped library cell.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct CellTypeAttrs {
    pub area: f32,
    pub delay: f32,
}

#[derive(Debug, Clone)]
pub struct CellType {
    name: String,
    symbol: CellSymbol,
    in_num: Option<u16>,
    out_num: u16,
    commutative: bool,
    regroupable: bool,
    attrs: Option<CellTypeAttrs>,
    implementation: Option<Rc<Subnet>>,
}

impl CellType {
    /// Custom cell type with a fixed number of inputs and outputs.
    pub fn new(name: impl Into<String>, in_num: u16, out_num: u16) -> Self {
        Self {
            name: name.into(),
            symbol: CellSymbol::Undef,
            in_num: Some(in_num),
            out_num,
            commutative: false,
            regroupable: false,
            attrs: None,
            implementation: None,
        }
    }

    fn builtin(symbol: CellSymbol) -> Self {
        let out_num = match symbol {
            CellSymbol::Out => 0,
            _ => 1,
        };
        Self {
            name: symbol.name().to_string(),
            symbol,
            in_num: symbol.fixed_arity().map(|n| n as u16),
            out_num,
            commutative: symbol.is_commutative(),
            regroupable: symbol.is_regroupable(),
            attrs: None,
            implementation: None,
        }
    }

    pub fn with_attrs(mut self, attrs: CellTypeAttrs) -> Self {
        self.attrs = Some(attrs);
        self
    }

    /// Attaches a functional model used by simulation and CNF encoding.
    ///
    /// # Panics
    ///
    /// Panics if the subnet interface does not match the type's arity.
    pub fn with_implementation(mut self, subnet: Rc<Subnet>) -> Self {
        assert_eq!(
            Some(subnet.in_num() as u16),
            self.in_num,
            "Implementation inputs do not match the cell type"
        );
        assert_eq!(
            subnet.out_num() as u16,
            self.out_num,
            "Implementation outputs do not match the cell type"
        );
        self.implementation = Some(subnet);
        self
    }

    pub fn with_commutative(mut self, commutative: bool) -> Self {
        self.commutative = commutative;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn symbol(&self) -> CellSymbol {
        self.symbol
    }
    pub fn in_num(&self) -> Option<u16> {
        self.in_num
    }
    pub fn out_num(&self) -> u16 {
        self.out_num
    }
    pub fn is_commutative(&self) -> bool {
        self.commutative
    }
    pub fn is_regroupable(&self) -> bool {
        self.regroupable
    }
    pub fn attrs(&self) -> Option<&CellTypeAttrs> {
        self.attrs.as_ref()
    }
    pub fn implementation(&self) -> Option<&Rc<Subnet>> {
        self.implementation.as_ref()
    }
}

/// Table of cell types, indexed by [`CellTypeId`].
///
/// The registry is an explicit value: callers that deal with library cells
/// pass it to the functions that need type attributes.
#[derive(Debug, Clone)]
pub struct CellTypeRegistry {
    types: Vec<CellType>,
    names: HashMap<String, CellTypeId>,
}

impl Default for CellTypeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            names: HashMap::new(),
        };
        for symbol in CellTypeId::BUILTIN {
            let id = registry.register(CellType::builtin(symbol));
            debug_assert_eq!(id, CellTypeId::of(symbol));
        }
        registry
    }
}

impl CellTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new type and returns its id.
    ///
    /// # Panics
    ///
    /// Panics if a type with the same name is already registered.
    pub fn register(&mut self, cell_type: CellType) -> CellTypeId {
        assert!(
            !self.names.contains_key(cell_type.name()),
            "Cell type '{}' is already registered",
            cell_type.name()
        );
        assert!(self.types.len() < u16::MAX as usize, "Too many cell types");
        let id = CellTypeId(self.types.len() as u16);
        self.names.insert(cell_type.name().to_string(), id);
        self.types.push(cell_type);
        id
    }

    /// # Panics
    ///
    /// Panics if `id` was not produced by this registry.
    pub fn get(&self, id: CellTypeId) -> &CellType {
        match self.types.get(id.index()) {
            Some(t) => t,
            None => panic!("Unknown cell type id {}", id.index()),
        }
    }

    pub fn find(&self, name: &str) -> Option<CellTypeId> {
        self.names.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_builtin_ids() {
        let registry = CellTypeRegistry::default();
        for symbol in [
            CellSymbol::In,
            CellSymbol::Out,
            CellSymbol::And,
            CellSymbol::Maj,
        ] {
            let id = CellTypeId::of(symbol);
            assert!(id.is_builtin());
            assert_eq!(id.symbol(), symbol);
            assert_eq!(registry.get(id).symbol(), symbol);
            assert_eq!(registry.find(symbol.name()), Some(id));
        }
        assert_eq!(registry.get(CellTypeId::BUF).in_num(), Some(1));
        assert_eq!(registry.get(CellTypeId::AND).in_num(), None);
        assert_eq!(registry.get(CellTypeId::OUT).out_num(), 0);
    }

    #[test]
    fn test_symbol_flags() {
        assert!(CellSymbol::Maj.is_commutative());
        assert!(!CellSymbol::Maj.is_regroupable());
        assert!(CellSymbol::Xor.is_regroupable());
        assert!(!CellSymbol::Buf.is_commutative());
        assert_eq!(CellSymbol::Zero.fixed_arity(), Some(0));
    }

    #[test]
    fn test_register_custom() {
        let mut registry = CellTypeRegistry::new();
        let n = registry.len();
        let id = registry.register(
            CellType::new("AOI21", 3, 1).with_attrs(CellTypeAttrs {
                area: 1.5,
                delay: 0.2,
            }),
        );
        assert!(!id.is_builtin());
        assert_eq!(id.symbol(), CellSymbol::Undef);
        assert_eq!(registry.len(), n + 1);
        assert_eq!(registry.find("AOI21"), Some(id));
        assert_eq!(registry.get(id).attrs().map(|a| a.area), Some(1.5));
        assert!(registry.get(id).implementation().is_none());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_register_duplicate() {
        let mut registry = CellTypeRegistry::new();
        registry.register(CellType::new("X", 1, 1));
        registry.register(CellType::new("X", 2, 1));
    }

    #[test]
    #[should_panic(expected = "has no builtin cell type")]
    fn test_undef_has_no_builtin() {
        CellTypeId::of(CellSymbol::Undef);
    }
}
