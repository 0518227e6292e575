use core::fmt;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{constants::default_profile, CostKind};

/// A cost threshold: either a concrete limit or no limit at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Execution aborts once the accumulated cost reaches the limit.
    Limited(u64),
    /// The cost is tracked but never aborts execution.
    #[default]
    Unlimited,
}

impl Threshold {
    /// Returns `true` if `value` has reached this threshold.
    pub const fn is_reached_by(&self, value: u64) -> bool {
        match self {
            Self::Limited(limit) => value >= *limit,
            Self::Unlimited => false,
        }
    }

    /// Returns the limit, or `None` if unlimited.
    pub const fn limit(&self) -> Option<u64> {
        match self {
            Self::Limited(limit) => Some(*limit),
            Self::Unlimited => None,
        }
    }
}

impl From<u64> for Threshold {
    fn from(value: u64) -> Self {
        Self::Limited(value)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(limit) => write!(f, "{limit}"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// The named set of cost thresholds governing one sandbox configuration, plus the threads that
/// are exempt from them.
///
/// # Presets
///
/// - [`ExecutionProfile::DEFAULT`]: thresholds from [`constants::default_profile`]
/// - [`ExecutionProfile::UNLIMITED`]: every threshold unlimited
///
/// [`constants::default_profile`]: crate::constants::default_profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    /// Threshold of the allocation counter.
    #[serde(default)]
    pub allocations: Threshold,
    /// Threshold of the invocation counter.
    #[serde(default)]
    pub invocations: Threshold,
    /// Threshold of the jump counter.
    #[serde(default)]
    pub jumps: Threshold,
    /// Threshold of the throw counter.
    #[serde(default)]
    pub throws: Threshold,
    /// Names of threads whose costs are accumulated but never checked against thresholds.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exempt_threads: BTreeSet<String>,
}

impl ExecutionProfile {
    /// The default profile for production use.
    pub const DEFAULT: Self = Self {
        allocations: Threshold::Limited(default_profile::ALLOCATIONS),
        invocations: Threshold::Limited(default_profile::INVOCATIONS),
        jumps: Threshold::Limited(default_profile::JUMPS),
        throws: Threshold::Limited(default_profile::THROWS),
        exempt_threads: BTreeSet::new(),
    };

    /// A profile without any limit.
    pub const UNLIMITED: Self = Self {
        allocations: Threshold::Unlimited,
        invocations: Threshold::Unlimited,
        jumps: Threshold::Unlimited,
        throws: Threshold::Unlimited,
        exempt_threads: BTreeSet::new(),
    };

    /// Returns the threshold of a cost counter.
    pub const fn threshold(&self, cost: CostKind) -> Threshold {
        match cost {
            CostKind::Allocation => self.allocations,
            CostKind::Invocation => self.invocations,
            CostKind::Jump => self.jumps,
            CostKind::Throw => self.throws,
        }
    }

    /// Returns the profile with the allocation threshold replaced.
    pub fn with_allocations(mut self, threshold: impl Into<Threshold>) -> Self {
        self.allocations = threshold.into();
        self
    }

    /// Returns the profile with the invocation threshold replaced.
    pub fn with_invocations(mut self, threshold: impl Into<Threshold>) -> Self {
        self.invocations = threshold.into();
        self
    }

    /// Returns the profile with the jump threshold replaced.
    pub fn with_jumps(mut self, threshold: impl Into<Threshold>) -> Self {
        self.jumps = threshold.into();
        self
    }

    /// Returns the profile with the throw threshold replaced.
    pub fn with_throws(mut self, threshold: impl Into<Threshold>) -> Self {
        self.throws = threshold.into();
        self
    }

    /// Returns the profile with the named thread exempt from thresholds.
    pub fn with_exempt_thread(mut self, name: impl Into<String>) -> Self {
        self.exempt_threads.insert(name.into());
        self
    }
}

impl Default for ExecutionProfile {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_reached_on_equality() {
        assert!(!Threshold::Limited(2).is_reached_by(1));
        assert!(Threshold::Limited(2).is_reached_by(2));
        assert!(Threshold::Limited(0).is_reached_by(0));
        assert!(!Threshold::Unlimited.is_reached_by(u64::MAX));
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: ExecutionProfile =
            serde_json::from_str(r#"{"jumps": {"limited": 5}, "exempt_threads": ["host"]}"#)
                .unwrap();
        assert_eq!(profile.jumps, Threshold::Limited(5));
        assert_eq!(profile.allocations, Threshold::Unlimited);
        assert_eq!(profile.exempt_threads, BTreeSet::from(["host".to_string()]));
    }

    #[test]
    fn test_builder_methods() {
        let profile = ExecutionProfile::UNLIMITED.with_jumps(0).with_throws(Threshold::Unlimited);
        assert_eq!(profile.threshold(CostKind::Jump), Threshold::Limited(0));
        assert_eq!(profile.threshold(CostKind::Throw), Threshold::Unlimited);
    }
}
