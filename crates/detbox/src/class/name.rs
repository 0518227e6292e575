use core::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::naming::CLASS_FILE_EXTENSION;

/// A fully qualified, dotted class name such as `com.acme.Contract`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct ClassName(String);

impl ClassName {
    /// Creates a class name without validating it. Use [`ClassName::is_valid`] when the name
    /// comes from an untrusted image.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if every dot-separated segment is non-empty and only contains identifier
    /// characters (`A-Z`, `a-z`, `0-9`, `_`, `$`, `-`).
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() &&
            self.0.split('.').all(|segment| {
                !segment.is_empty() &&
                    segment.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'))
            })
    }

    /// Returns the entry path of this class inside an archive or directory source, e.g.
    /// `com/acme/Contract.class`.
    pub fn entry_path(&self) -> String {
        format!("{}{CLASS_FILE_EXTENSION}", self.0.replace('.', "/"))
    }

    /// Parses an entry path back into a class name. Returns `None` for entries that are not
    /// class images.
    pub fn from_entry_path(path: &str) -> Option<Self> {
        let stem = path.strip_suffix(CLASS_FILE_EXTENSION)?;
        let name = Self(stem.trim_start_matches('/').replace(['/', '\\'], "."));
        name.is_valid().then_some(name)
    }

    /// Returns the package part of the name, or an empty string for the default package.
    pub fn package(&self) -> &str {
        self.0.rsplit_once('.').map_or("", |(package, _)| package)
    }

    /// Returns the name prefixed with `prefix`.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self(format!("{prefix}{}", self.0))
    }

    /// Strips `prefix` from the name, returning `None` if the name does not start with it.
    pub fn strip_prefix(&self, prefix: &str) -> Option<Self> {
        self.0.strip_prefix(prefix).map(|rest| Self(rest.to_string()))
    }

    /// Returns `true` if the name starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<&str> for ClassName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClassName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ClassName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ClassName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ClassName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A reference to a class member, rendered as `owner.member(arity)` in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberReference {
    /// The class declaring the member.
    pub owner: ClassName,
    /// The member name.
    pub name: String,
    /// The number of arguments for methods, `None` for fields.
    pub arity: Option<u8>,
}

impl fmt::Display for MemberReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arity {
            Some(arity) => write!(f, "{}.{}({arity})", self.owner, self.name),
            None => write!(f, "{}.{}", self.owner, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_path_round_trip() {
        let name = ClassName::new("com.acme.Contract");
        assert_eq!(name.entry_path(), "com/acme/Contract.class");
        assert_eq!(ClassName::from_entry_path("com/acme/Contract.class"), Some(name));
        assert_eq!(ClassName::from_entry_path("com/acme/README.md"), None);
    }

    #[test]
    fn test_validation() {
        assert!(ClassName::new("com.acme.Contract$Inner").is_valid());
        assert!(!ClassName::new("").is_valid());
        assert!(!ClassName::new("com..acme").is_valid());
        assert!(!ClassName::new("com.acme/Contract").is_valid());
    }

    #[test]
    fn test_prefixing() {
        let name = ClassName::new("java.util.List");
        let sandboxed = name.with_prefix("sandbox.");
        assert_eq!(sandboxed, "sandbox.java.util.List");
        assert_eq!(sandboxed.strip_prefix("sandbox."), Some(name.clone()));
        assert_eq!(name.strip_prefix("sandbox."), None);
        assert_eq!(name.package(), "java.util");
    }
}
