//! Property test strategies for registry workloads
//!
//! Object keys and principals come from small pools so generated
//! operations collide often.

use proptest::prelude::*;

pub use proptest;

/// One step applied to a registry under test
#[derive(Debug, Clone)]
pub enum Op {
    /// Register an exclusive lock
    Exclusive {
        /// Object index
        object: usize,
        /// Principal index
        principal: usize,
        /// Duration in seconds
        secs: Option<i64>,
    },
    /// Register a shared lock
    Shared {
        /// Object index
        object: usize,
        /// Principal indices
        principals: Vec<usize>,
        /// Duration in seconds
        secs: Option<i64>,
    },
    /// Register an endable freeze
    EndableFreeze {
        /// Object index
        object: usize,
        /// Duration in seconds
        secs: Option<i64>,
    },
    /// End the token at an object, if any
    End {
        /// Object index
        object: usize,
    },
    /// Add a principal to the shared lock at an object, if any
    Add {
        /// Object index
        object: usize,
        /// Principal index
        principal: usize,
    },
    /// Remove a principal from the shared lock at an object, if any
    Remove {
        /// Object index
        object: usize,
        /// Principal index
        principal: usize,
    },
    /// Move the remaining duration of the token at an object, if any
    Extend {
        /// Object index
        object: usize,
        /// New remaining duration in seconds
        secs: Option<i64>,
    },
    /// Advance the clock
    Advance {
        /// Seconds to advance
        secs: i64,
    },
    /// Sweep explicitly
    Sweep,
}

/// Size of the object key pool
pub const OBJECTS: usize = 4;
/// Size of the principal pool
pub const PRINCIPALS: usize = 3;

/// Object key for a pool index
pub fn object_key(index: usize) -> String {
    format!("object-{index}")
}

/// Principal for a pool index
pub fn principal(index: usize) -> String {
    format!("principal-{index}")
}

fn arb_secs() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(1i64..120)
}

/// Strategy for a single operation
pub fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..OBJECTS, 0..PRINCIPALS, arb_secs()).prop_map(|(object, principal, secs)| {
            Op::Exclusive {
                object,
                principal,
                secs,
            }
        }),
        (
            0..OBJECTS,
            prop::collection::vec(0..PRINCIPALS, 1..=PRINCIPALS),
            arb_secs()
        )
            .prop_map(|(object, principals, secs)| Op::Shared {
                object,
                principals,
                secs,
            }),
        (0..OBJECTS, arb_secs()).prop_map(|(object, secs)| Op::EndableFreeze { object, secs }),
        (0..OBJECTS).prop_map(|object| Op::End { object }),
        (0..OBJECTS, 0..PRINCIPALS).prop_map(|(object, principal)| Op::Add { object, principal }),
        (0..OBJECTS, 0..PRINCIPALS)
            .prop_map(|(object, principal)| Op::Remove { object, principal }),
        (0..OBJECTS, arb_secs()).prop_map(|(object, secs)| Op::Extend { object, secs }),
        (1i64..90).prop_map(|secs| Op::Advance { secs }),
        Just(Op::Sweep),
    ]
}

/// Strategy for an operation sequence
pub fn arb_ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(arb_op(), 1..max_len)
}
