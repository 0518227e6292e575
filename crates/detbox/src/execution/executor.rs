use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    ClassLoadingError, ClassName, ClassSource, CostReport, ExecutionFault, ExecutionState,
    FatalSignal, HostRuntime, SandboxConfiguration, SandboxRuntimeContext, ThresholdViolation,
};

/// The outcome of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary<T> {
    /// The value returned by the entry point.
    pub result: T,
    /// The accumulated costs.
    pub costs: CostReport,
}

/// Why an execution failed, as seen by the code that invoked the sandbox.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionFailure {
    /// A cost threshold was reached.
    #[error(transparent)]
    ThresholdViolation(ThresholdViolation),
    /// Sandboxed code tried to catch an uncatchable throwable.
    #[error("{class}: {message}")]
    Uncatchable {
        /// The throwable class.
        class: ClassName,
        /// The throwable message.
        message: String,
    },
    /// Sandboxed code let a throwable escape the entry point.
    #[error("{class}: {message}")]
    Thrown {
        /// The throwable class, as named before sandboxing.
        class: ClassName,
        /// The throwable message.
        message: String,
    },
    /// A class failed to load.
    #[error(transparent)]
    Load(ClassLoadingError),
    /// A member reference could not be linked.
    #[error("Failed to link {class}: {message}")]
    Linkage {
        /// The class the reference was resolved against.
        class: ClassName,
        /// What could not be linked.
        message: String,
    },
}

impl ExecutionFailure {
    /// A stable identifier of the failure kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ThresholdViolation(_) => "threshold_violation",
            Self::Uncatchable { .. } => "uncatchable",
            Self::Thrown { .. } => "thrown",
            Self::Load(_) => "load",
            Self::Linkage { .. } => "linkage",
        }
    }
}

impl From<ExecutionFault> for ExecutionFailure {
    fn from(fault: ExecutionFault) -> Self {
        match fault {
            ExecutionFault::Thrown { class, message } => Self::Thrown { class, message },
            ExecutionFault::Fatal(FatalSignal::Threshold(violation)) => Self::ThresholdViolation(violation),
            ExecutionFault::Fatal(FatalSignal::Uncatchable { class, message }) => {
                Self::Uncatchable { class, message }
            }
            ExecutionFault::Load(error) => Self::Load(error),
            ExecutionFault::Linkage { class, message } => Self::Linkage { class, message },
        }
    }
}

/// A failed execution together with the costs accumulated until it stopped.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{cause}")]
pub struct SandboxException {
    /// Why the execution failed.
    pub cause: ExecutionFailure,
    /// The costs accumulated until the failure.
    pub costs: CostReport,
}

/// Runs entry classes in fresh sandbox contexts.
///
/// Every [`SandboxExecutor::run`] opens its own [`SandboxRuntimeContext`], so no class and no
/// cost survives from one run to the next.
#[derive(Debug, Clone)]
pub struct SandboxExecutor<R> {
    configuration: Arc<SandboxConfiguration>,
    runtime: R,
}

impl<R: HostRuntime> SandboxExecutor<R> {
    /// Creates an executor.
    pub const fn new(configuration: Arc<SandboxConfiguration>, runtime: R) -> Self {
        Self { configuration, runtime }
    }

    /// The configuration every run uses.
    pub const fn configuration(&self) -> &Arc<SandboxConfiguration> {
        &self.configuration
    }

    /// Loads `class_name` from `sources` and runs its entry point with `input`.
    ///
    /// If a threshold was reached during the run, the outcome is a threshold violation even when
    /// the runtime returned normally.
    pub fn run(
        &self,
        sources: Vec<ClassSource>,
        class_name: &ClassName,
        input: R::Input,
    ) -> Result<ExecutionSummary<R::Output>, SandboxException> {
        SandboxRuntimeContext::with(self.configuration.clone(), sources, |context| {
            context.transition(ExecutionState::Loading);
            let outcome = context
                .class_loader()
                .load(class_name)
                .map_err(ExecutionFault::Load)
                .and_then(|entry| {
                    context.transition(ExecutionState::Executing);
                    self.runtime.run(context, &entry, input)
                });

            let costs = context.runtime_costs().report();
            let outcome = match (context.runtime_costs().violation(), outcome) {
                (Some(violation), _) => Err(ExecutionFailure::ThresholdViolation(violation)),
                (None, Ok(result)) => Ok(result),
                (None, Err(fault)) => Err(ExecutionFailure::from(fault)),
            };

            match outcome {
                Ok(result) => {
                    context.transition(ExecutionState::Completed);
                    debug!(class = %class_name, ?costs, "sandboxed execution completed");
                    Ok(ExecutionSummary { result, costs })
                }
                Err(cause) => {
                    context.transition(ExecutionState::Aborted);
                    let cause = match cause {
                        ExecutionFailure::Thrown { class, message } => ExecutionFailure::Thrown {
                            class: context.class_loader().resolver().reverse(&class),
                            message,
                        },
                        cause => cause,
                    };
                    warn!(class = %class_name, kind = cause.kind(), %cause, ?costs, "sandboxed execution aborted");
                    Err(SandboxException { cause, costs })
                }
            }
        })
    }
}
