//! Strongly-typed identifiers used across the optimizer.
//!
//! Downstream crates should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Arena key of a node inside one `OperatorGraph`.
new_id!(NodeId);
// Logical column identity, stable across renames and plan rewrites.
new_id!(Uid);

/// Allocates field uids for one plan.
///
/// The generator is owned by the plan rather than living in a global so that
/// tests can start from a known seed and get reproducible uids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UidGenerator {
    next: u64,
}

impl UidGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(seed: u64) -> Self {
        Self { next: seed }
    }

    pub fn next_uid(&mut self) -> Uid {
        let uid = Uid::new(self.next);
        self.next += 1;
        uid
    }

    /// Peek at the uid the next call to `next_uid` will return.
    pub fn peek(&self) -> Uid {
        Uid::new(self.next)
    }

    pub fn reset(&mut self, seed: u64) {
        self.next = seed;
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uids_are_sequential_from_seed() {
        let mut gen = UidGenerator::starting_at(40);
        assert_eq!(gen.next_uid(), Uid::new(40));
        assert_eq!(gen.next_uid(), Uid::new(41));
        assert_eq!(gen.peek(), Uid::new(42));
        gen.reset(7);
        assert_eq!(gen.next_uid().get(), 7);
    }

    #[test]
    fn ids_display_with_type_name() {
        assert_eq!(NodeId::new(3).to_string(), "NodeId(3)");
        assert_eq!(Uid::new(9).to_string(), "Uid(9)");
    }
}
