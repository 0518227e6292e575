use core::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::{
    constants::costing::OBJECT_ALLOCATION_COST, CostKind, ExecutionProfile, RuntimeCost,
    RuntimeCounter, ThreadFilter, ThresholdViolation,
};

/// A serializable snapshot of the accumulated costs of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostReport {
    /// Accumulated allocation units.
    pub allocations: u64,
    /// Number of method invocations.
    pub invocations: u64,
    /// Number of jumps taken or considered.
    pub jumps: u64,
    /// Number of exceptions thrown.
    pub throws: u64,
}

impl CostReport {
    /// Returns the value of one counter.
    pub const fn get(&self, cost: CostKind) -> u64 {
        match cost {
            CostKind::Allocation => self.allocations,
            CostKind::Invocation => self.invocations,
            CostKind::Jump => self.jumps,
            CostKind::Throw => self.throws,
        }
    }
}

/// The fixed bundle of cost counters built from one [`ExecutionProfile`].
///
/// The summary is `!Sync`. It is created by
/// [`SandboxRuntimeContext::with`](crate::SandboxRuntimeContext::with) and lives exactly as long
/// as the context, on the thread the context is bound to.
#[derive(Debug)]
pub struct RuntimeCostSummary {
    /// Allocation units of objects and arrays.
    pub allocation_cost: RuntimeCounter,
    /// Method invocations.
    pub invocation_cost: RuntimeCounter,
    /// Jumps.
    pub jump_cost: RuntimeCounter,
    /// Thrown exceptions.
    pub throw_cost: RuntimeCounter,
    /// The first violation raised by any counter.
    first_violation: RefCell<Option<ThresholdViolation>>,
}

impl RuntimeCostSummary {
    /// Creates fresh counters for `profile`.
    pub fn new(profile: &ExecutionProfile) -> Self {
        let filter = ThreadFilter::new(profile.exempt_threads.iter().cloned());
        let counter = |kind| RuntimeCounter::counter(kind, profile.threshold(kind), filter.clone());
        Self {
            allocation_cost: counter(CostKind::Allocation),
            invocation_cost: counter(CostKind::Invocation),
            jump_cost: counter(CostKind::Jump),
            throw_cost: counter(CostKind::Throw),
            first_violation: RefCell::new(None),
        }
    }

    /// Returns the counter of a cost kind.
    pub const fn cost(&self, kind: CostKind) -> &RuntimeCounter {
        match kind {
            CostKind::Allocation => &self.allocation_cost,
            CostKind::Invocation => &self.invocation_cost,
            CostKind::Jump => &self.jump_cost,
            CostKind::Throw => &self.throw_cost,
        }
    }

    /// Charges `amount` to the counter of `kind`.
    ///
    /// # Errors
    ///
    /// Returns the [`ThresholdViolation`] of the counter once its threshold has been reached.
    pub fn record(&self, kind: CostKind, amount: u64) -> Result<(), ThresholdViolation> {
        self.cost(kind).increment_by(amount).inspect_err(|violation| {
            self.first_violation.borrow_mut().get_or_insert_with(|| violation.clone());
        })
    }

    /// Charges the allocation of one object.
    ///
    /// # Errors
    ///
    /// See [`RuntimeCostSummary::record`].
    pub fn record_object_allocation(&self) -> Result<(), ThresholdViolation> {
        self.record(CostKind::Allocation, OBJECT_ALLOCATION_COST)
    }

    /// Charges the allocation of an array of `length` elements of `element_size` units each.
    ///
    /// # Errors
    ///
    /// See [`RuntimeCostSummary::record`].
    pub fn record_array_allocation(
        &self,
        length: u64,
        element_size: u64,
    ) -> Result<(), ThresholdViolation> {
        self.record(CostKind::Allocation, length.saturating_mul(element_size))
    }

    /// Returns the first violation raised during this execution, if any.
    pub fn violation(&self) -> Option<ThresholdViolation> {
        self.first_violation.borrow().clone()
    }

    /// Returns `true` if any counter has reached its threshold.
    pub fn has_violation(&self) -> bool {
        self.first_violation.borrow().is_some()
    }

    /// Takes a snapshot of the accumulated costs.
    pub fn report(&self) -> CostReport {
        CostReport {
            allocations: self.allocation_cost.value(),
            invocations: self.invocation_cost.value(),
            jumps: self.jump_cost.value(),
            throws: self.throw_cost.value(),
        }
    }
}
