use std::collections::HashMap;

use num_bigint::BigUint;

use crate::bdd::Bdd;
use crate::reference::Ref;

impl Bdd {
    /// Returns one satisfying path of `node` as DIMACS-style literals
    /// (`v` or `-v`), or `None` for the constant false function.
    ///
    /// Variables not on the path are unconstrained.
    pub fn one_sat(&self, node: Ref) -> Option<Vec<i32>> {
        if self.is_zero(node) {
            return None;
        }

        let mut path = Vec::new();
        let mut current = node;
        while !self.is_one(current) {
            let v = self.variable(current) as i32;
            let high = self.high_node(current);
            if !self.is_zero(high) {
                path.push(v);
                current = high;
            } else {
                path.push(-v);
                current = self.low_node(current);
            }
        }
        Some(path)
    }

    /// Number of assignments over variables `1..=num_vars` satisfying `node`.
    pub fn sat_count(&self, node: Ref, num_vars: usize) -> BigUint {
        let max = BigUint::from(1u32) << num_vars;
        let mut cache = HashMap::new();
        self.sat_count_rec(node, &max, &mut cache)
    }

    fn sat_count_rec(&self, node: Ref, max: &BigUint, cache: &mut HashMap<Ref, BigUint>) -> BigUint {
        if self.is_zero(node) {
            return BigUint::ZERO;
        } else if self.is_one(node) {
            return max.clone();
        }
        if let Some(count) = cache.get(&node) {
            return count.clone();
        }

        let low = self.sat_count_rec(self.low_node(node), max, cache);
        let high = self.sat_count_rec(self.high_node(node), max, cache);
        let count: BigUint = (low + high) >> 1;
        cache.insert(node, count.clone());
        count
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn cube(bdd: &Bdd, lits: &[i32]) -> Ref {
        lits.iter().fold(bdd.one, |acc, &l| {
            let x = bdd.mk_var(l.unsigned_abs());
            bdd.apply_and(acc, if l < 0 { -x } else { x })
        })
    }

    #[test]
    fn test_one_sat() {
        let bdd = Bdd::default();
        let f = cube(&bdd, &[1, -2, -3]);
        let model = bdd.one_sat(f);
        println!("model = {:?}", model);
        assert_eq!(model, Some(vec![1, -2, -3]));

        let g = bdd.apply_and(f, -cube(&bdd, &[1, -2, -3]));
        assert_eq!(bdd.one_sat(g), None);
        assert_eq!(bdd.one_sat(bdd.one), Some(vec![]));
    }

    #[test]
    fn test_one_sat_satisfies() {
        let bdd = Bdd::default();
        let x: Vec<Ref> = (1..=4).map(|v| bdd.mk_var(v)).collect();
        let f = bdd.apply_and(bdd.apply_xor(x[0], x[1]), bdd.apply_or(-x[2], x[3]));
        let path = bdd.one_sat(f).unwrap();
        let mut values = vec![false; 4];
        for l in path {
            values[l.unsigned_abs() as usize - 1] = l > 0;
        }
        assert!(bdd.eval(f, &values));
    }

    #[test]
    fn test_sat_count() {
        let bdd = Bdd::default();
        assert_eq!(bdd.sat_count(bdd.zero, 3), BigUint::from(0u32));
        assert_eq!(bdd.sat_count(bdd.one, 3), BigUint::from(8u32));

        let x1 = bdd.mk_var(1);
        assert_eq!(bdd.sat_count(x1, 1), BigUint::from(1u32));
        assert_eq!(bdd.sat_count(x1, 3), BigUint::from(4u32));

        let f = cube(&bdd, &[1, 2]);
        assert_eq!(bdd.sat_count(f, 2), BigUint::from(1u32));
        assert_eq!(bdd.sat_count(-f, 2), BigUint::from(3u32));
        assert_eq!(bdd.sat_count(-f, 4), BigUint::from(12u32));

        let x2 = bdd.mk_var(2);
        let parity = bdd.apply_xor(x1, x2);
        assert_eq!(bdd.sat_count(parity, 2), BigUint::from(2u32));
    }
}
