//! Static class-loading policy: the whitelist, forbidden names and the sandbox namespace.

mod configuration;
mod whitelist;

pub use configuration::*;
pub use whitelist::*;
