use core::{
    cell::{Cell, RefCell},
    fmt,
};
use std::{collections::BTreeSet, sync::Arc, thread};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{constants::costing::DEFAULT_INCREMENT, Threshold};

/// The cost counters every execution is metered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    /// Object and array allocations.
    Allocation,
    /// Method invocations.
    Invocation,
    /// Branches and jumps.
    Jump,
    /// Thrown exceptions.
    Throw,
}

impl CostKind {
    /// All cost kinds, in reporting order.
    pub const ALL: [Self; 4] = [Self::Allocation, Self::Invocation, Self::Jump, Self::Throw];

    /// The short name of the counter, as used in violation reports.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Allocation => "allocation",
            Self::Invocation => "invocation",
            Self::Jump => "jump",
            Self::Throw => "throw",
        }
    }

    /// The activity this counter meters, phrased for violation messages.
    pub const fn activity(&self) -> &'static str {
        match self {
            Self::Allocation => "allocation",
            Self::Invocation => "method invocation",
            Self::Jump => "looping",
            Self::Throw => "throwing exceptions",
        }
    }
}

impl fmt::Display for CostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The fatal report raised when a cost counter reaches its threshold.
///
/// It carries the offending thread, the counter, the threshold and the value that reached it, so
/// that observability collaborators can log it and operators can tune profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ThresholdViolation {
    /// The name (or id) of the thread that was terminated.
    pub thread: String,
    /// The counter that reached its threshold.
    pub cost: CostKind,
    /// The configured threshold.
    pub threshold: u64,
    /// The accumulated cost at the time of the violation.
    pub value: u64,
    /// Human-readable description.
    pub message: String,
}

/// Decides which threads are exempt from threshold checks.
#[derive(Debug, Clone, Default)]
pub struct ThreadFilter {
    exempt: Arc<BTreeSet<String>>,
}

impl ThreadFilter {
    /// Creates a filter exempting the threads with the given names.
    pub fn new(exempt: impl IntoIterator<Item = String>) -> Self {
        Self { exempt: Arc::new(exempt.into_iter().collect()) }
    }

    /// Returns `true` if the thread is exempt.
    pub fn is_exempt(&self, thread: &thread::Thread) -> bool {
        thread.name().is_some_and(|name| self.exempt.contains(name))
    }
}

/// Returns a printable identity for a thread: its name, or its id when unnamed.
pub(crate) fn thread_label(thread: &thread::Thread) -> String {
    thread.name().map_or_else(|| format!("{:?}", thread.id()), str::to_string)
}

/// A named runtime cost counter.
pub trait RuntimeCost: fmt::Debug {
    /// The counter this cost feeds.
    fn kind(&self) -> CostKind;

    /// The accumulated cost of the calling thread. Has no side effects.
    fn value(&self) -> u64;

    /// The configured threshold.
    fn threshold(&self) -> Threshold;

    /// Adds `amount` to the calling thread's accumulator and checks the threshold.
    ///
    /// # Errors
    ///
    /// Returns the [`ThresholdViolation`] once the threshold is reached on a non-exempt thread.
    /// The violation is latched: every later call fails with the same violation.
    fn increment_by(&self, amount: u64) -> Result<(), ThresholdViolation>;

    /// Adds the default increment of one.
    ///
    /// # Errors
    ///
    /// See [`RuntimeCost::increment_by`].
    fn increment(&self) -> Result<(), ThresholdViolation> {
        self.increment_by(DEFAULT_INCREMENT)
    }
}

type Predicate<T> = Box<dyn Fn(T) -> bool>;
type MessageFn<T> = Box<dyn Fn(&str, T) -> String>;

/// A cost counter over an arbitrary monotonic value type.
///
/// The accumulator lives in a [`Cell`], so the counter is `!Sync`: it can only ever be touched by
/// the thread that owns the [`SandboxRuntimeContext`](crate::SandboxRuntimeContext) it belongs to.
pub struct TypedRuntimeCost<T> {
    kind: CostKind,
    threshold: Threshold,
    initial: T,
    value: Cell<T>,
    update: fn(T, u64) -> T,
    predicate: Predicate<T>,
    message: MessageFn<T>,
    filter: ThreadFilter,
    violation: RefCell<Option<ThresholdViolation>>,
}

/// The counter type used for every built-in cost.
pub type RuntimeCounter = TypedRuntimeCost<u64>;

impl<T: Copy + Into<u64>> TypedRuntimeCost<T> {
    /// Creates a cost counter.
    ///
    /// * `initial` - the value before the first increment
    /// * `update` - monotonic function producing the new value from the old one and an amount
    /// * `predicate` - returns `true` when the value has reached the threshold
    /// * `message` - renders the violation message for the offending thread and value
    pub fn new(
        kind: CostKind,
        threshold: Threshold,
        initial: T,
        update: fn(T, u64) -> T,
        predicate: impl Fn(T) -> bool + 'static,
        message: impl Fn(&str, T) -> String + 'static,
        filter: ThreadFilter,
    ) -> Self {
        Self {
            kind,
            threshold,
            initial,
            value: Cell::new(initial),
            update,
            predicate: Box::new(predicate),
            message: Box::new(message),
            filter,
            violation: RefCell::new(None),
        }
    }

    /// The value the counter started from.
    pub fn initial(&self) -> T {
        self.initial
    }

    /// The latched violation, if the threshold has been reached.
    pub fn violation(&self) -> Option<ThresholdViolation> {
        self.violation.borrow().clone()
    }
}

impl RuntimeCounter {
    /// Creates a saturating `u64` counter checked against `threshold`.
    pub fn counter(kind: CostKind, threshold: Threshold, filter: ThreadFilter) -> Self {
        Self::new(
            kind,
            threshold,
            0,
            u64::saturating_add,
            move |value| threshold.is_reached_by(value),
            move |thread, value| {
                format!(
                    "Thread {thread} terminated due to excessive use of {activity} \
                     ({kind} cost {value} reached threshold {threshold})",
                    activity = kind.activity(),
                )
            },
            filter,
        )
    }
}

impl<T: Copy + Into<u64>> RuntimeCost for TypedRuntimeCost<T> {
    fn kind(&self) -> CostKind {
        self.kind
    }

    fn value(&self) -> u64 {
        self.value.get().into()
    }

    fn threshold(&self) -> Threshold {
        self.threshold
    }

    fn increment_by(&self, amount: u64) -> Result<(), ThresholdViolation> {
        // short circuit if the threshold has already been reached
        if let Some(violation) = self.violation.borrow().as_ref() {
            return Err(violation.clone())
        }

        let value = (self.update)(self.value.get(), amount);
        self.value.set(value);
        if !(self.predicate)(value) {
            return Ok(())
        }

        let current = thread::current();
        if self.filter.is_exempt(&current) {
            return Ok(())
        }

        let thread = thread_label(&current);
        let violation = ThresholdViolation {
            message: (self.message)(&thread, value),
            thread,
            cost: self.kind,
            threshold: self.threshold.limit().unwrap_or(u64::MAX),
            value: value.into(),
        };
        warn!(
            thread = %violation.thread,
            cost = %violation.cost,
            threshold = violation.threshold,
            value = violation.value,
            "sandbox threshold violation"
        );
        *self.violation.borrow_mut() = Some(violation.clone());
        Err(violation)
    }
}

impl<T: Copy + Into<u64>> fmt::Debug for TypedRuntimeCost<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedRuntimeCost")
            .field("kind", &self.kind)
            .field("threshold", &self.threshold)
            .field("value", &self.value())
            .field("violated", &self.violation.borrow().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_latches_violation() {
        let counter = RuntimeCounter::counter(CostKind::Jump, Threshold::Limited(2), ThreadFilter::default());
        assert!(counter.increment().is_ok());
        let violation = counter.increment().unwrap_err();
        assert_eq!(violation.value, 2);
        assert_eq!(violation.threshold, 2);
        assert!(violation.message.contains("looping"));
        assert!(violation.message.contains("jump cost 2"));

        // further increments fail with the same report and leave the value untouched
        assert_eq!(counter.increment_by(10).unwrap_err(), violation);
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_unlimited_counter_never_violates() {
        let counter =
            RuntimeCounter::counter(CostKind::Allocation, Threshold::Unlimited, ThreadFilter::default());
        assert!(counter.increment_by(u64::MAX).is_ok());
        assert!(counter.increment_by(1).is_ok());
        assert_eq!(counter.value(), u64::MAX);
    }

    #[test]
    fn test_exempt_thread_accumulates_without_violation() {
        let handle = thread::Builder::new()
            .name("exempt-worker".to_string())
            .spawn(|| {
                let filter = ThreadFilter::new(["exempt-worker".to_string()]);
                let counter = RuntimeCounter::counter(CostKind::Throw, Threshold::Limited(1), filter);
                for _ in 0..5 {
                    counter.increment().unwrap();
                }
                (counter.value(), counter.violation())
            })
            .unwrap();
        let (value, violation) = handle.join().unwrap();
        assert_eq!(value, 5);
        assert!(violation.is_none());
    }

    #[test]
    fn test_custom_typed_cost() {
        let cost: TypedRuntimeCost<u32> = TypedRuntimeCost::new(
            CostKind::Invocation,
            Threshold::Limited(100),
            10,
            |value, amount| value.saturating_add(amount as u32 * 10),
            |value| value >= 100,
            |thread, value| format!("{thread} made {value} calls"),
            ThreadFilter::default(),
        );
        assert_eq!(cost.initial(), 10);
        for _ in 0..8 {
            cost.increment().unwrap();
        }
        assert_eq!(cost.value(), 90);
        let violation = cost.increment().unwrap_err();
        assert_eq!(violation.value, 100);
        assert!(violation.message.ends_with("made 100 calls"));
    }
}
