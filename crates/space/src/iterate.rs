//! Randomized exactly-once enumeration of a configuration space.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::Config;
use crate::error::SpaceError;
use crate::space::ConfigSpace;

/// Yields every valid configuration of a space exactly once, in a
/// pseudo-random order.
///
/// A bitset tracks visited indices. While the space is mostly unvisited,
/// indices are rejection-sampled; once fewer than 1/8 of the indices
/// remain, the iterator switches to picking the k-th unvisited bit so the
/// tail stays cheap. The same seed reproduces the same order.
#[derive(Debug, Clone)]
pub struct ConfigIterator {
    space: ConfigSpace,
    visited: Vec<u64>,
    size: u64,
    remaining: u64,
    rng: StdRng,
    seed: Option<u64>,
}

impl ConfigIterator {
    pub(crate) fn new(space: ConfigSpace) -> Result<Self, SpaceError> {
        let mut iter = ConfigIterator {
            visited: Vec::new(),
            size: space.size()?,
            remaining: 0,
            rng: StdRng::from_entropy(),
            seed: None,
            space,
        };
        iter.reset();
        Ok(iter)
    }

    /// An iterator with a fixed seed; identical seeds enumerate in an
    /// identical order.
    pub fn with_seed(space: &ConfigSpace, seed: u64) -> Result<Self, SpaceError> {
        let mut iter = ConfigIterator::new(space.clone())?;
        iter.seed = Some(seed);
        iter.reset();
        Ok(iter)
    }

    /// Forget all visited indices and reseed. A fixed seed is kept; without
    /// one the order is re-randomized from entropy.
    pub fn reset(&mut self) {
        let words = self.size.div_ceil(64) as usize;
        self.visited = vec![0u64; words];
        self.remaining = self.size;
        self.rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
    }

    /// The next unvisited valid configuration, or `None` once the space is
    /// exhausted. Exhaustion is permanent until [`reset`](Self::reset).
    pub fn next(&mut self) -> Result<Option<Config>, SpaceError> {
        while self.remaining > 0 {
            let index = self.pick_index();
            self.mark(index);
            self.remaining -= 1;

            let mut config = Config::new();
            if self.space.get(index, &mut config)? {
                return Ok(Some(config));
            }
        }
        Ok(None)
    }

    fn pick_index(&mut self) -> u64 {
        // dense phase: rejection sampling has expected O(1) cost while at
        // least 1/8 of the indices are still unvisited
        if self.remaining.saturating_mul(8) >= self.size {
            loop {
                let candidate = self.rng.gen_range(0..self.size);
                if !self.is_set(candidate) {
                    return candidate;
                }
            }
        }

        // sparse phase: take the k-th unvisited index
        let mut k = self.rng.gen_range(0..self.remaining);
        for index in 0..self.size {
            if !self.is_set(index) {
                if k == 0 {
                    return index;
                }
                k -= 1;
            }
        }
        unreachable!("remaining count disagrees with the visited bitset")
    }

    fn is_set(&self, index: u64) -> bool {
        self.visited[(index / 64) as usize] & (1 << (index % 64)) != 0
    }

    fn mark(&mut self, index: u64) {
        self.visited[(index / 64) as usize] |= 1 << (index % 64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Param;

    fn triangular_space() -> (ConfigSpace, Param, Param) {
        let mut space = ConfigSpace::new();
        let a = space.tune("a", vec![1, 2, 3]).unwrap();
        let b = space.tune("b", vec![1, 2, 3]).unwrap();
        space.restrict(a.expr().le(&b));
        (space, a, b)
    }

    fn collect_pairs(iter: &mut ConfigIterator, a: &Param, b: &Param) -> Vec<(i64, i64)> {
        let mut pairs = Vec::new();
        while let Some(config) = iter.next().unwrap() {
            pairs.push((
                config.at(a).unwrap().to::<i64>().unwrap(),
                config.at(b).unwrap().to::<i64>().unwrap(),
            ));
        }
        pairs
    }

    #[test]
    fn yields_every_valid_config_exactly_once() {
        let (space, a, b) = triangular_space();
        let mut iter = space.iterate().unwrap();

        let mut pairs = collect_pairs(&mut iter, &a, &b);
        pairs.sort();
        assert_eq!(pairs, vec![(1, 1), (1, 2), (1, 3), (2, 2), (2, 3), (3, 3)]);

        // exhausted forever
        assert!(iter.next().unwrap().is_none());
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn same_seed_same_order() {
        let (space, a, b) = triangular_space();

        let mut first = ConfigIterator::with_seed(&space, 99).unwrap();
        let mut second = ConfigIterator::with_seed(&space, 99).unwrap();

        assert_eq!(
            collect_pairs(&mut first, &a, &b),
            collect_pairs(&mut second, &a, &b)
        );
    }

    #[test]
    fn reset_revisits_the_whole_space() {
        let (space, a, b) = triangular_space();
        let mut iter = ConfigIterator::with_seed(&space, 7).unwrap();

        let first_pass = collect_pairs(&mut iter, &a, &b);
        iter.reset();
        let second_pass = collect_pairs(&mut iter, &a, &b);

        assert_eq!(first_pass.len(), 6);
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn covers_large_sparse_spaces() {
        let mut space = ConfigSpace::new();
        let x = space.tune("x", crate::range(0, 64, 1)).unwrap();
        let y = space.tune("y", crate::range(0, 16, 1)).unwrap();
        // keep roughly 1/16 of the points
        space.restrict(((x.expr() + y.expr()) % 16).eq_val(0));

        let mut iter = ConfigIterator::with_seed(&space, 3).unwrap();
        let mut count = 0;
        let mut seen = std::collections::HashSet::new();
        while let Some(config) = iter.next().unwrap() {
            let key = (
                config.at(&x).unwrap().to::<i64>().unwrap(),
                config.at(&y).unwrap().to::<i64>().unwrap(),
            );
            assert!(seen.insert(key));
            count += 1;
        }
        assert_eq!(count, 64);
    }
}
