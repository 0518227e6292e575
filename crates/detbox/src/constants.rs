//! Constants for the deterministic sandbox.
//!
//! It groups the constants for naming, cost accounting and the built-in profiles as sub-modules.

/// Constants for the sandbox namespace and engine-reserved names.
pub mod naming {
    /// The prefix every rewritten class receives. Host classes never start with it, so a
    /// rewritten class can never collide with the host class it was derived from.
    pub const SANDBOX_NAMESPACE: &str = "sandbox.";
    /// The marker interface attached to every rewritten class.
    pub const SANDBOXED_MARKER: &str = "detbox.runtime.Sandboxed";
    /// The extension of a class image inside an archive or directory source.
    pub const CLASS_FILE_EXTENSION: &str = ".class";
    /// The name of the constructor method.
    pub const CONSTRUCTOR: &str = "<init>";
    /// The name of the static initializer.
    pub const STATIC_INITIALIZER: &str = "<clinit>";
    /// The name of the finalizer method which sandboxed classes may not declare.
    pub const FINALIZER: &str = "finalize";
    /// The static method the executor invokes on an entry class.
    pub const ENTRY_POINT: &str = "apply";
}

/// Constants for cost accounting.
pub mod costing {
    /// The allocation cost of a single object instance.
    pub const OBJECT_ALLOCATION_COST: u64 = 16;
    /// The allocation cost of one array element, used when the element size is unknown.
    pub const ARRAY_ELEMENT_COST: u64 = 8;
    /// The default increment applied by [`RuntimeCost::increment`](crate::RuntimeCost).
    pub const DEFAULT_INCREMENT: u64 = 1;
}

/// Thresholds of the `DEFAULT` execution profile.
pub mod default_profile {
    /// Allocation threshold (1 GiB worth of allocation units).
    pub const ALLOCATIONS: u64 = 1024 * 1024 * 1024;
    /// Invocation threshold.
    pub const INVOCATIONS: u64 = 1_000_000;
    /// Jump threshold.
    pub const JUMPS: u64 = 1_000_000;
    /// Throw threshold.
    pub const THROWS: u64 = 1_000_000;
}

/// Attribute keys written by the built-in definition providers.
pub mod attributes {
    /// The label of the class source a rewritten class was read from.
    pub const ORIGIN: &str = "detbox.origin";
    /// The allocation threshold baked into the rewritten class.
    pub const ALLOCATION_THRESHOLD: &str = "detbox.threshold.allocations";
    /// The invocation threshold baked into the rewritten class.
    pub const INVOCATION_THRESHOLD: &str = "detbox.threshold.invocations";
    /// The jump threshold baked into the rewritten class.
    pub const JUMP_THRESHOLD: &str = "detbox.threshold.jumps";
    /// The throw threshold baked into the rewritten class.
    pub const THROW_THRESHOLD: &str = "detbox.threshold.throws";
}
