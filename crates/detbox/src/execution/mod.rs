//! Running entry classes through a host runtime.

mod executor;
mod runtime;

pub use executor::*;
pub use runtime::*;
