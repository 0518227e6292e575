//! Deterministic sandbox execution engine.
//!
//! `detbox` takes externally supplied classes, verifies and rewrites them so that every execution
//! is reproducible and resource-bounded, and meters the rewritten code while it runs. A threshold
//! breach raises a fatal signal that sandboxed exception handlers can never intercept.
//!
//! The moving parts, leaves first:
//!
//! - [`Whitelist`] and [`AnalysisConfiguration`]: which names pass through, which are forbidden,
//!   and the sandbox namespace.
//! - [`ClassResolver`]: maps original names to sandboxed names and classifies them.
//! - [`SourceClassLoader`]: reads raw class images from the configured [`ClassSource`]s.
//! - [`Rule`], [`Emitter`] and [`DefinitionProvider`]: the ordered rewriting pipeline.
//! - [`SandboxClassLoader`]: drives the pipeline and caches rewritten classes for one context.
//! - [`ExecutionProfile`], [`RuntimeCostSummary`]: thresholds and the per-thread counters.
//! - [`SandboxRuntimeContext`]: binds one configuration, loader and cost summary to a thread.
//! - [`SandboxExecutor`]: runs an entry class through a [`HostRuntime`] and reports the outcome.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;

mod analysis;
pub use analysis::*;

mod class;
pub use class::*;

mod configuration;
pub use configuration::*;

mod context;
pub use context::*;

mod costing;
pub use costing::*;

mod error;
pub use error::*;

mod execution;
pub use execution::*;

mod host;
pub use host::*;

pub mod policy;

mod resolver;
pub use resolver::*;

mod rewiring;
pub use rewiring::*;

mod source;
pub use source::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
