//! Execution profiles and runtime cost accounting.
//!
//! Every execution is metered by four counters: allocations, invocations, jumps and throws. The
//! counters are built from an [`ExecutionProfile`] when a context opens and are exclusively owned
//! by the thread the context is bound to.

mod profile;
mod runtime_cost;
mod summary;

pub use profile::*;
pub use runtime_cost::*;
pub use summary::*;
