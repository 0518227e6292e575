//! The class model the sandbox verifies, rewrites and loads.
//!
//! A class is a [`ClassDefinition`]: a named bundle of fields and methods whose bodies are
//! sequences of [`Instruction`]s for a small stack machine. Class images travel as the JSON
//! serialization of the definition; see [`ClassDefinition::decode`] and
//! [`ClassDefinition::encode`].

mod definition;
mod instruction;
mod name;

pub use definition::*;
pub use instruction::*;
pub use name::*;
