//! Configuration spaces for GPU kernel autotuning.
//!
//! A [`ConfigSpace`] is the Cartesian product of tunable parameter domains,
//! intersected with boolean restrictions. Points of the space are
//! [`Config`]urations; [`ConfigIterator`] enumerates every valid point
//! exactly once in a pseudo-random order.

pub mod config;
pub mod error;
pub mod expr;
pub mod iterate;
pub mod param;
pub mod space;
pub mod value;

pub use config::Config;
pub use error::{CastError, SpaceError};
pub use expr::{div_ceil, lit, BinaryOp, Expr, IntoExpr, UnaryOp};
pub use iterate::ConfigIterator;
pub use param::{Param, ValueType};
pub use space::ConfigSpace;
pub use value::{intern, FromValue, InternedStr, Value};

/// Build the half-open integer range `[start, end)` with the given stride.
///
/// Convenient for parameter domains: `space.tune("unroll", range(1, 9, 1))`.
pub fn range(start: i64, end: i64, step: i64) -> Vec<i64> {
    let mut values = Vec::new();
    let mut current = start;
    while current < end && step > 0 {
        values.push(current);
        current += step;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::range;

    #[test]
    fn range_is_half_open() {
        assert_eq!(range(0, 4, 1), vec![0, 1, 2, 3]);
        assert_eq!(range(1, 10, 4), vec![1, 5, 9]);
        assert!(range(3, 3, 1).is_empty());
        assert!(range(0, 10, 0).is_empty());
    }
}
