//! The built-in rewriting policy.
//!
//! The default configuration applies, in order:
//!
//! | Kind                | Components                                                            |
//! |---------------------|-----------------------------------------------------------------------|
//! | rules               | reserved instructions, native methods, finalizers, internal references, API references |
//! | emitters            | strip synchronization, trace allocations/invocations/jumps/throws, guard exception handlers, rewrite type references |
//! | definition providers| sandboxed marker, execution profile, origin                           |

mod emitters;
mod providers;
mod rules;

use std::sync::Arc;

pub use emitters::*;
pub use providers::*;
pub use rules::*;

use crate::{DefinitionProvider, Emitter, Rule};

/// The built-in rules, in application order.
pub fn default_rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(DisallowReservedInstructions),
        Arc::new(DisallowNativeMethods),
        Arc::new(DisallowFinalizerMethods),
        Arc::new(DisallowInternalReferences),
        Arc::new(DisallowApiReferences::default()),
        Arc::new(DisallowSandboxedReferences),
    ]
}

/// The built-in emitters, in application order. Type references are rewritten last so that
/// every other emitter sees the original names.
pub fn default_emitters() -> Vec<Arc<dyn Emitter>> {
    vec![
        Arc::new(StripSynchronization),
        Arc::new(TraceAllocations::default()),
        Arc::new(TraceInvocations),
        Arc::new(TraceJumps),
        Arc::new(TraceThrows),
        Arc::new(GuardExceptionHandlers),
        Arc::new(RewriteTypeReferences),
    ]
}

/// The built-in definition providers, in application order.
pub fn default_definition_providers() -> Vec<Arc<dyn DefinitionProvider>> {
    vec![Arc::new(MarkSandboxed), Arc::new(RecordExecutionProfile), Arc::new(RecordOrigin)]
}
