use core::{
    cell::{Cell, RefCell},
    fmt,
};
use std::{collections::BTreeSet, rc::Rc, sync::Arc, thread};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    ClassName, ClassSource, FatalSignal, RuntimeCostSummary, SandboxClassLoader,
    SandboxConfiguration,
};

thread_local! {
    static CURRENT: RefCell<Option<SandboxRuntimeContext>> = const { RefCell::new(None) };
}

/// The lifecycle of one sandboxed execution.
///
/// `Created → Loading → Executing → Completed | Aborted`. Any state that is not terminal may move
/// to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// The context is bound but nothing has been loaded yet.
    Created,
    /// Entry classes are being loaded.
    Loading,
    /// Sandboxed code is running.
    Executing,
    /// Execution finished normally.
    Completed,
    /// Execution was terminated.
    Aborted,
}

impl ExecutionState {
    /// Returns `true` for `Completed` and `Aborted`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns `true` if the lifecycle may move from `self` to `next`.
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Loading) |
                (Self::Loading, Self::Executing) |
                (Self::Executing, Self::Completed)
        ) || (!self.is_terminal() && matches!(next, Self::Aborted))
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Loading => "loading",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

struct ContextInner {
    configuration: Arc<SandboxConfiguration>,
    class_loader: SandboxClassLoader,
    runtime_costs: RuntimeCostSummary,
    state: Cell<ExecutionState>,
}

/// The unit of execution: one configuration, one class loader and one cost summary, bound to the
/// thread running sandboxed code for the duration of [`SandboxRuntimeContext::with`].
///
/// The handle is reference counted and `!Send`, so it can never leave the thread it is bound to.
/// The class loader and the cost summary are created fresh for every context; nothing is shared
/// between contexts except the read-only configuration.
#[derive(Clone)]
pub struct SandboxRuntimeContext {
    inner: Rc<ContextInner>,
}

impl SandboxRuntimeContext {
    /// Opens a context for `class_sources`, binds it to the calling thread, runs `body` with it
    /// and unbinds it again, whether `body` returns or unwinds.
    ///
    /// # Panics
    ///
    /// Panics if a context is already bound to the calling thread.
    pub fn with<R>(
        configuration: Arc<SandboxConfiguration>,
        class_sources: Vec<ClassSource>,
        body: impl FnOnce(&Self) -> R,
    ) -> R {
        if CURRENT.with(|current| current.borrow().is_some()) {
            panic!(
                "a sandbox runtime context is already bound to thread {:?}; contexts cannot be nested",
                thread::current().name().unwrap_or("<unnamed>")
            );
        }

        let context = Self {
            inner: Rc::new(ContextInner {
                runtime_costs: RuntimeCostSummary::new(configuration.profile()),
                class_loader: SandboxClassLoader::new(configuration.clone(), class_sources),
                configuration,
                state: Cell::new(ExecutionState::Created),
            }),
        };

        CURRENT.with(|current| *current.borrow_mut() = Some(context.clone()));
        let _binding = Binding;
        trace!("bound sandbox runtime context");
        body(&context)
    }

    /// Returns the context bound to the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if no context is bound. Reading the current context outside of
    /// [`SandboxRuntimeContext::with`] is a bug in the caller.
    pub fn current() -> Self {
        Self::try_current().unwrap_or_else(|| panic!("no sandbox runtime context is bound to this thread"))
    }

    /// Returns the context bound to the calling thread, if any.
    pub fn try_current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// The configuration the context was opened with.
    pub fn configuration(&self) -> &Arc<SandboxConfiguration> {
        &self.inner.configuration
    }

    /// The class loader of this context.
    pub fn class_loader(&self) -> &SandboxClassLoader {
        &self.inner.class_loader
    }

    /// The cost counters of this context.
    pub fn runtime_costs(&self) -> &RuntimeCostSummary {
        &self.inner.runtime_costs
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ExecutionState {
        self.inner.state.get()
    }

    /// Moves the lifecycle to `next`.
    ///
    /// # Panics
    ///
    /// Panics if the transition is not allowed.
    pub fn transition(&self, next: ExecutionState) {
        let state = self.state();
        assert!(state.can_transition_to(next), "invalid execution state transition {state} -> {next}");
        trace!(from = %state, to = %next, "execution state transition");
        self.inner.state.set(next);
    }

    /// Checks whether a sandboxed exception handler may catch a throwable of class `thrown`
    /// (a runtime name).
    ///
    /// Host runtimes call this at every handler entry, through [`SandboxOp::CheckCatch`].
    /// Returns the fatal signal if a threshold has already been reached, or if `thrown` is, or
    /// extends, one of the uncatchable throwables.
    ///
    /// [`SandboxOp::CheckCatch`]: crate::SandboxOp::CheckCatch
    pub fn check_catch(&self, thrown: &ClassName, message: &str) -> Result<(), FatalSignal> {
        if let Some(violation) = self.runtime_costs().violation() {
            return Err(FatalSignal::Threshold(violation))
        }

        let loader = self.class_loader();
        let analysis = self.configuration().analysis();
        let mut visited = BTreeSet::new();
        let mut current = Some(loader.resolver().reverse(thrown));
        while let Some(name) = current.take() {
            if analysis.is_uncatchable(&name) {
                return Err(FatalSignal::Uncatchable {
                    class: loader.resolver().reverse(thrown),
                    message: message.to_string(),
                })
            }
            if !visited.insert(name.clone()) {
                break
            }
            // a class that cannot be loaded has no super chain to inspect
            current = loader
                .load(&name)
                .ok()
                .and_then(|class| class.super_name().map(|parent| loader.resolver().reverse(parent)));
        }
        Ok(())
    }
}

impl fmt::Debug for SandboxRuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxRuntimeContext")
            .field("state", &self.state())
            .field("profile", self.inner.configuration.profile())
            .field("costs", &self.inner.runtime_costs.report())
            .finish_non_exhaustive()
    }
}

/// Clears the thread binding when dropped.
struct Binding;

impl Drop for Binding {
    fn drop(&mut self) {
        // the slot is already gone if the thread is being torn down
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
        trace!("unbound sandbox runtime context");
    }
}
