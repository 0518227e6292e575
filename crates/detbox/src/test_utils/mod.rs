//! Test utilities: class builders, a standard host environment and a reference runtime that
//! interprets rewritten classes.

mod builder;
mod host;
mod runtime;

pub use builder::*;
pub use host::*;
pub use runtime::*;
