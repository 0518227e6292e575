//! The rewriting pipeline and the class loader that drives it.

mod editor;
mod loader;
mod pipeline;

pub use editor::*;
pub use loader::*;
pub use pipeline::*;
