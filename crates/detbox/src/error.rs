//! Error types shared across the engine.

use core::fmt;
use std::{io, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{ClassFormatError, ClassName, RejectReason, ThresholdViolation};

/// The stage of [`SandboxClassLoader::load`](crate::SandboxClassLoader::load) at which a class
/// failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoadStage {
    /// Classification of the requested name.
    Resolve,
    /// Reading raw bytes from the class sources.
    Read,
    /// Decoding the class image.
    Decode,
    /// A named rule.
    Rule(String),
    /// A named emitter.
    Emitter(String),
    /// A named definition provider.
    DefinitionProvider(String),
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => f.write_str("resolve"),
            Self::Read => f.write_str("read"),
            Self::Decode => f.write_str("decode"),
            Self::Rule(name) => write!(f, "rule:{name}"),
            Self::Emitter(name) => write!(f, "emitter:{name}"),
            Self::DefinitionProvider(name) => write!(f, "definition-provider:{name}"),
        }
    }
}

/// An error raised while resolving, reading, decoding or rewriting a class.
///
/// Every variant names the class and can report the [`LoadStage`] it failed at. The loader never
/// retries a failed load; the error is returned to the caller as is.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassLoadingError {
    /// The analysis configuration rejects the name.
    #[error("Class {name} is not allowed in the sandbox: {reason}")]
    Rejected {
        /// The requested class.
        name: ClassName,
        /// Why it was rejected.
        reason: RejectReason,
    },
    /// No source declares the class.
    #[error("Class file not found; {entry} (searched: {})", .searched.join(", "))]
    ClassNotFound {
        /// The requested class.
        name: ClassName,
        /// The entry path that was looked up.
        entry: String,
        /// Labels of every source searched, in search order.
        searched: Vec<String>,
    },
    /// The class image could not be decoded.
    #[error("Class {name} has an invalid format: {source}")]
    ClassFormat {
        /// The requested class.
        name: ClassName,
        /// The underlying format error.
        #[source]
        source: ClassFormatError,
    },
    /// The image declares a different class than the one requested.
    #[error("Class image for {name} declares {declared}")]
    NameMismatch {
        /// The requested class.
        name: ClassName,
        /// The name found in the image.
        declared: ClassName,
    },
    /// A rule, emitter or definition provider failed.
    #[error("Failed to load class {name} at {stage}: {message}")]
    Pipeline {
        /// The requested class.
        name: ClassName,
        /// The pass that failed.
        stage: LoadStage,
        /// The failure description.
        message: String,
    },
    /// A class source could not be read.
    #[error("Failed to read {} while loading {name}: {source}", .path.display())]
    Io {
        /// The requested class.
        name: ClassName,
        /// The path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl ClassLoadingError {
    /// The class that failed to load.
    pub const fn class_name(&self) -> &ClassName {
        match self {
            Self::Rejected { name, .. } |
            Self::ClassNotFound { name, .. } |
            Self::ClassFormat { name, .. } |
            Self::NameMismatch { name, .. } |
            Self::Pipeline { name, .. } |
            Self::Io { name, .. } => name,
        }
    }

    /// The stage the load failed at.
    pub fn stage(&self) -> LoadStage {
        match self {
            Self::Rejected { .. } => LoadStage::Resolve,
            Self::ClassNotFound { .. } | Self::Io { .. } => LoadStage::Read,
            Self::ClassFormat { .. } | Self::NameMismatch { .. } => LoadStage::Decode,
            Self::Pipeline { stage, .. } => stage.clone(),
        }
    }
}

/// A class source could not be enumerated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to scan {label} at {}: {source}", .path.display())]
pub struct SourceScanError {
    /// The label of the source, see [`ClassSource::label`](crate::ClassSource::label).
    pub label: String,
    /// The path that failed.
    pub path: PathBuf,
    /// The underlying I/O error.
    #[source]
    pub source: Arc<io::Error>,
}

/// An error raised while building a whitelist or a pattern set.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WhitelistError {
    /// A pattern is not a valid regular expression.
    #[error("invalid name pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// The regex error.
        #[source]
        source: regex::Error,
    },
    /// A pattern is declared both public and internal.
    #[error("name pattern '{0}' is declared both public and internal")]
    Overlap(String),
    /// A class or package pattern of one set covers a name the other set also matches.
    #[error("class {name} is matched both by public pattern '{public}' and internal pattern '{internal}'")]
    OverlappingName {
        /// A name matched by both sets.
        name: String,
        /// The first public pattern matching it.
        public: String,
        /// The first internal pattern matching it.
        internal: String,
    },
}

/// An error raised while building a [`SandboxConfiguration`](crate::SandboxConfiguration) or an
/// [`AnalysisConfiguration`](crate::AnalysisConfiguration).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigurationError {
    /// Two pipeline components of the same kind share a name.
    #[error("duplicate {kind} named '{name}'")]
    DuplicateComponent {
        /// The component kind: rule, emitter or definition provider.
        kind: &'static str,
        /// The duplicated name.
        name: String,
    },
    /// The sandbox namespace prefix is empty or does not end with a dot.
    #[error("invalid sandbox namespace '{0}'")]
    InvalidNamespace(String),
    /// A whitelist or forbidden pattern is invalid.
    #[error(transparent)]
    Whitelist(#[from] WhitelistError),
}

/// The un-catchable termination signal.
///
/// A fatal signal is not a throwable: host runtimes propagate it out of every frame and exception
/// handlers in sandboxed code never observe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FatalSignal {
    /// A cost threshold was reached.
    #[error(transparent)]
    Threshold(ThresholdViolation),
    /// Sandboxed code tried to catch a throwable that may not be caught.
    #[error("{class}: {message}")]
    Uncatchable {
        /// The throwable class.
        class: ClassName,
        /// The throwable message.
        message: String,
    },
}

impl From<ThresholdViolation> for FatalSignal {
    fn from(violation: ThresholdViolation) -> Self {
        Self::Threshold(violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CostKind;

    #[test]
    fn test_stage_names() {
        assert_eq!(LoadStage::Resolve.to_string(), "resolve");
        assert_eq!(LoadStage::Rule("disallow-native-methods".into()).to_string(), "rule:disallow-native-methods");
        assert_eq!(
            LoadStage::DefinitionProvider("mark-sandboxed".into()).to_string(),
            "definition-provider:mark-sandboxed"
        );
    }

    #[test]
    fn test_class_not_found_message() {
        let name = ClassName::new("com.acme.Missing");
        let error = ClassLoadingError::ClassNotFound {
            entry: name.entry_path(),
            name,
            searched: vec!["memory:a".into(), "archive:b.json".into()],
        };
        assert_eq!(
            error.to_string(),
            "Class file not found; com/acme/Missing.class (searched: memory:a, archive:b.json)"
        );
        assert_eq!(error.stage(), LoadStage::Read);
    }

    #[test]
    fn test_fatal_signal_display() {
        let violation = ThresholdViolation {
            thread: "main".into(),
            cost: CostKind::Jump,
            threshold: 0,
            value: 1,
            message: "Thread main terminated due to excessive use of looping".into(),
        };
        assert_eq!(FatalSignal::from(violation).to_string(), "Thread main terminated due to excessive use of looping");
    }
}
