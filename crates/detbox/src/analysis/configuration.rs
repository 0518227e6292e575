use core::fmt;
use std::{collections::BTreeSet, sync::Arc};

use crate::{
    class_pattern, constants::naming::SANDBOX_NAMESPACE, package_pattern, ClassName,
    ConfigurationError, HostClasses, HostEnvironment, NamePatterns, Whitelist, WhitelistKind,
};

/// Throwables sandboxed code may never catch.
const DEFAULT_UNCATCHABLE: [&str; 3] =
    ["java.lang.ThreadDeath", "java.lang.StackOverflowError", "java.lang.OutOfMemoryError"];

/// Why a class name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The name is not a valid dotted class name.
    InvalidName,
    /// The name lies inside the reserved sandbox namespace.
    ReservedNamespace(String),
    /// The name matches a forbidden pattern.
    Blacklisted(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => f.write_str("not a valid class name"),
            Self::ReservedNamespace(namespace) => {
                write!(f, "the namespace '{namespace}' is reserved for rewritten classes")
            }
            Self::Blacklisted(pattern) => {
                write!(f, "explicitly blacklisted by pattern '{pattern}'")
            }
        }
    }
}

/// The decision the analysis configuration takes for a class name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Loaded unmodified from the host environment.
    PassThrough,
    /// Read from the class sources and rewritten into the sandbox namespace.
    Rewrite,
    /// Never loaded.
    Reject(RejectReason),
}

/// The static policy of one sandbox configuration.
///
/// Owns the [`Whitelist`], the forbidden-name patterns, the sandbox namespace prefix, the
/// throwables that may never be caught, and the [`HostEnvironment`] pass-through classes are
/// loaded from.
#[derive(Debug, Clone)]
pub struct AnalysisConfiguration {
    whitelist: Whitelist,
    forbidden: NamePatterns,
    namespace: String,
    uncatchable: BTreeSet<ClassName>,
    host: Arc<dyn HostEnvironment>,
}

impl AnalysisConfiguration {
    /// Returns a builder starting from the minimal whitelist and an empty host.
    pub fn builder() -> AnalysisConfigurationBuilder {
        AnalysisConfigurationBuilder::default()
    }

    /// Classifies a class name. Pure: no I/O and no caching.
    ///
    /// Malformed names are rejected first, then names inside the sandbox namespace, then
    /// forbidden names. Whitelisted names pass through; everything else is rewritten.
    pub fn classify(&self, name: &ClassName) -> Classification {
        if !name.is_valid() {
            return Classification::Reject(RejectReason::InvalidName)
        }
        if name.starts_with(&self.namespace) {
            return Classification::Reject(RejectReason::ReservedNamespace(self.namespace.clone()))
        }
        if let Some(pattern) = self.forbidden.first_match(name.as_str()) {
            return Classification::Reject(RejectReason::Blacklisted(pattern.to_string()))
        }
        match self.whitelist.lookup(name) {
            Some(_) => Classification::PassThrough,
            None => Classification::Rewrite,
        }
    }

    /// Returns `true` if `name` is an engine-internal pass-through class.
    pub fn is_internal(&self, name: &ClassName) -> bool {
        self.whitelist.lookup(name) == Some(WhitelistKind::Internal)
    }

    /// Returns `true` if `name` is a throwable sandboxed code may not catch.
    pub fn is_uncatchable(&self, name: &ClassName) -> bool {
        self.uncatchable.contains(name)
    }

    /// The throwables sandboxed code may not catch.
    pub const fn uncatchable(&self) -> &BTreeSet<ClassName> {
        &self.uncatchable
    }

    /// The whitelist.
    pub const fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// The forbidden-name patterns.
    pub const fn forbidden(&self) -> &NamePatterns {
        &self.forbidden
    }

    /// The sandbox namespace prefix, including the trailing dot.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The host environment pass-through classes and bootstrap bytes come from.
    pub fn host(&self) -> &dyn HostEnvironment {
        self.host.as_ref()
    }

    /// A shared handle to the host environment.
    pub fn shared_host(&self) -> Arc<dyn HostEnvironment> {
        self.host.clone()
    }
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            whitelist: Whitelist::minimal().clone(),
            forbidden: NamePatterns::empty(),
            namespace: SANDBOX_NAMESPACE.to_string(),
            uncatchable: DEFAULT_UNCATCHABLE.into_iter().map(ClassName::from).collect(),
            host: Arc::new(HostClasses::empty()),
        }
    }
}

/// Builder for an [`AnalysisConfiguration`].
#[derive(Debug)]
pub struct AnalysisConfigurationBuilder {
    whitelist: Whitelist,
    forbidden: Vec<String>,
    namespace: String,
    uncatchable: BTreeSet<ClassName>,
    host: Arc<dyn HostEnvironment>,
}

impl Default for AnalysisConfigurationBuilder {
    fn default() -> Self {
        let AnalysisConfiguration { whitelist, namespace, uncatchable, host, .. } =
            AnalysisConfiguration::default();
        Self { whitelist, forbidden: Vec::new(), namespace, uncatchable, host }
    }
}

impl AnalysisConfigurationBuilder {
    /// Replaces the whitelist.
    pub fn whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Forbids every name matching a raw pattern.
    pub fn forbid_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.forbidden.push(pattern.into());
        self
    }

    /// Forbids a single class.
    pub fn forbid_class(self, class: &str) -> Self {
        self.forbid_pattern(class_pattern(class))
    }

    /// Forbids every class of a package and its sub-packages.
    pub fn forbid_package(self, package: &str) -> Self {
        self.forbid_pattern(package_pattern(package))
    }

    /// Replaces the sandbox namespace prefix. It must end with a dot.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Adds a throwable class sandboxed code may not catch.
    pub fn uncatchable(mut self, class: impl Into<ClassName>) -> Self {
        self.uncatchable.insert(class.into());
        self
    }

    /// Replaces the host environment.
    pub fn host(mut self, host: impl HostEnvironment + 'static) -> Self {
        self.host = Arc::new(host);
        self
    }

    /// Replaces the host environment with a shared one.
    pub fn shared_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = host;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<AnalysisConfiguration, ConfigurationError> {
        if self.namespace.len() < 2 || !self.namespace.ends_with('.') || self.namespace.starts_with('.') {
            return Err(ConfigurationError::InvalidNamespace(self.namespace))
        }
        Ok(AnalysisConfiguration {
            whitelist: self.whitelist,
            forbidden: NamePatterns::new(self.forbidden)?,
            namespace: self.namespace,
            uncatchable: self.uncatchable,
            host: self.host,
        })
    }
}
