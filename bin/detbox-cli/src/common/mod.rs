//! Argument groups and helpers shared by every command.

mod args;
mod error;
mod logging;

pub use args::*;
pub use error::*;
pub use logging::*;

use serde::Serialize;

/// Prints a value as pretty JSON to stdout.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
