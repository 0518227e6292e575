use std::sync::Arc;

use auto_impl::auto_impl;

use crate::{ClassLoadingError, ClassName, FatalSignal, LoadedClass, SandboxRuntimeContext, ThresholdViolation};

/// Why a host runtime stopped executing sandboxed code.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionFault {
    /// Sandboxed code threw a throwable that no handler caught.
    #[error("{class}: {message}")]
    Thrown {
        /// The class of the throwable, as named at runtime.
        class: ClassName,
        /// The throwable message.
        message: String,
    },
    /// The un-catchable termination signal.
    #[error(transparent)]
    Fatal(#[from] FatalSignal),
    /// A class needed during execution failed to load.
    #[error(transparent)]
    Load(#[from] ClassLoadingError),
    /// A referenced member does not exist or cannot be used as requested.
    #[error("Failed to link {class}: {message}")]
    Linkage {
        /// The class the reference was resolved against.
        class: ClassName,
        /// What could not be linked.
        message: String,
    },
}

impl From<ThresholdViolation> for ExecutionFault {
    fn from(violation: ThresholdViolation) -> Self {
        Self::Fatal(FatalSignal::Threshold(violation))
    }
}

/// The pre-existing managed runtime that interprets rewritten classes.
///
/// The runtime executes on the thread the context is bound to. Whenever it reaches a
/// [`SandboxOp`](crate::SandboxOp) it calls back into the context: meters go to
/// [`SandboxRuntimeContext::runtime_costs`], catch checks to
/// [`SandboxRuntimeContext::check_catch`]. A [`FatalSignal`] must be propagated out of every
/// frame; it is never offered to exception handlers.
#[auto_impl(&, Box, Arc)]
pub trait HostRuntime {
    /// The argument handed to the entry point.
    type Input;
    /// The value the entry point returns.
    type Output;

    /// Runs the entry point of `entry`.
    fn run(
        &self,
        context: &SandboxRuntimeContext,
        entry: &Arc<LoadedClass>,
        input: Self::Input,
    ) -> Result<Self::Output, ExecutionFault>;
}
