//! Class sources and the loader that reads raw class images from them.

mod archive;
mod loader;

pub use archive::*;
pub use loader::*;
