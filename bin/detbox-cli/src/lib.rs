//! Commands of the `detbox` CLI tool.

mod cmd;
pub use cmd::*;

pub mod check;
pub mod common;
pub mod rewrite;
pub mod run;
