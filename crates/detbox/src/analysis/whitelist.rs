use once_cell::race::OnceBox;
use regex::{Regex, RegexSet};

use crate::{ClassName, WhitelistError};

/// Classes trusted by the engine itself. They are loaded from the host environment unmodified.
const MINIMAL_PUBLIC_CLASSES: [&str; 6] = [
    "java.lang.Object",
    "java.lang.Throwable",
    "java.lang.Error",
    "java.lang.Exception",
    "java.lang.RuntimeException",
    "java.lang.String",
];

/// Returns the anchored pattern matching exactly `class`.
pub fn class_pattern(class: &str) -> String {
    regex::escape(class)
}

/// Returns the anchored pattern matching every class inside `package` and its sub-packages.
pub fn package_pattern(package: &str) -> String {
    format!(r"{}\..+", regex::escape(package))
}

/// Returns a name the pattern matches if it was built by [`class_pattern`] or
/// [`package_pattern`].
fn representative_name(pattern: &str) -> Option<String> {
    let (literal, member) = match pattern.strip_suffix(r"\..+") {
        Some(package) => (package, ".Member"),
        None => (pattern, ""),
    };
    let name = literal.replace('\\', "");
    (regex::escape(&name) == literal).then(|| format!("{name}{member}"))
}

/// An immutable, ordered set of anchored name patterns.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    patterns: Vec<String>,
    set: RegexSet,
}

impl NamePatterns {
    /// Compiles the patterns. Each pattern must match a whole dotted name.
    pub fn new<I, S>(patterns: I) -> Result<Self, WhitelistError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let anchored = patterns.iter().map(|pattern| format!("^(?:{pattern})$"));
        let set = RegexSet::new(anchored).map_err(|_| {
            // report the first pattern that fails to compile on its own
            patterns
                .iter()
                .find_map(|pattern| {
                    Regex::new(pattern).err().map(|source| WhitelistError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
                })
                .unwrap_or_else(|| WhitelistError::InvalidPattern {
                    pattern: patterns.join("|"),
                    source: regex::Error::Syntax("pattern set failed to compile".to_string()),
                })
        })?;
        Ok(Self { patterns, set })
    }

    /// An empty pattern set, matching nothing.
    pub fn empty() -> Self {
        Self { patterns: Vec::new(), set: RegexSet::empty() }
    }

    /// Returns `true` if any pattern matches the whole name.
    pub fn matches(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    /// Returns the first declared pattern that matches the name.
    pub fn first_match(&self, name: &str) -> Option<&str> {
        self.set.matches(name).iter().next().map(|index| self.patterns[index].as_str())
    }

    /// The declared patterns, unanchored, in declaration order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns `true` if the set holds no pattern.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Which whitelist set a name matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WhitelistKind {
    /// Trusted host classes sandboxed code may reference directly.
    Public,
    /// Engine-internal classes. They pass through, but sandboxed code may not reference them.
    Internal,
}

/// Two disjoint sets of name patterns, `public` and `internal`, naming the classes that pass
/// through the sandbox unmodified.
///
/// A whitelist is built once with [`Whitelist::builder`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Whitelist {
    public: NamePatterns,
    internal: NamePatterns,
}

impl Whitelist {
    /// Returns a builder for a whitelist.
    pub fn builder() -> WhitelistBuilder {
        WhitelistBuilder::default()
    }

    /// The whitelist of the engine's trusted primitives.
    pub fn minimal() -> &'static Self {
        static INSTANCE: OnceBox<Whitelist> = OnceBox::new();
        INSTANCE.get_or_init(|| {
            let whitelist = MINIMAL_PUBLIC_CLASSES
                .iter()
                .fold(Self::builder(), |builder, class| builder.public_class(*class))
                .build()
                .expect("escaped class names are valid patterns");
            Box::new(whitelist)
        })
    }

    /// The whitelist that lets nothing pass through.
    pub fn empty() -> &'static Self {
        static INSTANCE: OnceBox<Whitelist> = OnceBox::new();
        INSTANCE.get_or_init(|| {
            Box::new(Self { public: NamePatterns::empty(), internal: NamePatterns::empty() })
        })
    }

    /// Returns which set matches `name`, public first.
    ///
    /// The builder rejects class and package entries that overlap the other set, but two raw
    /// patterns may still both match a name. Such a name is reported as public.
    pub fn lookup(&self, name: &ClassName) -> Option<WhitelistKind> {
        if self.public.matches(name.as_str()) {
            Some(WhitelistKind::Public)
        } else if self.internal.matches(name.as_str()) {
            Some(WhitelistKind::Internal)
        } else {
            None
        }
    }

    /// Returns `true` if `name` matches a public pattern.
    pub fn is_public(&self, name: &ClassName) -> bool {
        self.public.matches(name.as_str())
    }

    /// Returns `true` if `name` matches an internal pattern.
    pub fn is_internal(&self, name: &ClassName) -> bool {
        self.internal.matches(name.as_str())
    }

    /// The public patterns.
    pub const fn public(&self) -> &NamePatterns {
        &self.public
    }

    /// The internal patterns.
    pub const fn internal(&self) -> &NamePatterns {
        &self.internal
    }
}

/// Builder for a [`Whitelist`].
#[derive(Debug, Clone, Default)]
pub struct WhitelistBuilder {
    public: Vec<String>,
    internal: Vec<String>,
}

impl WhitelistBuilder {
    /// Extends the builder with every pattern of an existing whitelist.
    pub fn extend_from(mut self, whitelist: &Whitelist) -> Self {
        self.public.extend_from_slice(whitelist.public.patterns());
        self.internal.extend_from_slice(whitelist.internal.patterns());
        self
    }

    /// Adds a raw public pattern.
    pub fn public_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.public.push(pattern.into());
        self
    }

    /// Adds a single public class.
    pub fn public_class(self, class: &str) -> Self {
        self.public_pattern(class_pattern(class))
    }

    /// Adds every class of a package and its sub-packages to the public set.
    pub fn public_package(self, package: &str) -> Self {
        self.public_pattern(package_pattern(package))
    }

    /// Adds a raw internal pattern.
    pub fn internal_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.internal.push(pattern.into());
        self
    }

    /// Adds a single internal class.
    pub fn internal_class(self, class: &str) -> Self {
        self.internal_pattern(class_pattern(class))
    }

    /// Adds every class of a package and its sub-packages to the internal set.
    pub fn internal_package(self, package: &str) -> Self {
        self.internal_pattern(package_pattern(package))
    }

    /// Compiles the whitelist.
    ///
    /// Fails if a pattern does not compile or is declared in both sets, or if a class or package
    /// entry of one set covers a name the other set also matches. Raw patterns are only compared
    /// verbatim.
    pub fn build(self) -> Result<Whitelist, WhitelistError> {
        if let Some(pattern) = self.public.iter().find(|pattern| self.internal.contains(pattern)) {
            return Err(WhitelistError::Overlap(pattern.clone()))
        }
        let whitelist =
            Whitelist { public: NamePatterns::new(self.public)?, internal: NamePatterns::new(self.internal)? };
        let declared = whitelist.public.patterns().iter().chain(whitelist.internal.patterns());
        for name in declared.filter_map(|pattern| representative_name(pattern)) {
            if let (Some(public), Some(internal)) =
                (whitelist.public.first_match(&name), whitelist.internal.first_match(&name))
            {
                return Err(WhitelistError::OverlappingName {
                    public: public.to_string(),
                    internal: internal.to_string(),
                    name,
                })
            }
        }
        Ok(whitelist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_whitelist() {
        let whitelist = Whitelist::minimal();
        assert!(whitelist.is_public(&"java.lang.Object".into()));
        assert!(whitelist.is_public(&"java.lang.String".into()));
        // the dot is escaped, so lookalike names do not match
        assert!(!whitelist.is_public(&"javaXlang.Object".into()));
        assert!(!whitelist.is_public(&"java.lang.ObjectFactory".into()));
        assert_eq!(whitelist.lookup(&"java.util.List".into()), None);
    }

    #[test]
    fn test_empty_whitelist_matches_nothing() {
        assert_eq!(Whitelist::empty().lookup(&"java.lang.Object".into()), None);
    }

    #[test]
    fn test_packages_and_internal_set() {
        let whitelist = Whitelist::builder()
            .public_package("kotlin")
            .internal_package("detbox.runtime")
            .build()
            .unwrap();
        assert_eq!(whitelist.lookup(&"kotlin.collections.List".into()), Some(WhitelistKind::Public));
        assert_eq!(whitelist.lookup(&"detbox.runtime.Sandboxed".into()), Some(WhitelistKind::Internal));
        assert_eq!(whitelist.lookup(&"kotlin".into()), None);
    }

    #[test]
    fn test_overlapping_sets_are_rejected() {
        let result = Whitelist::builder().public_class("a.B").internal_class("a.B").build();
        assert!(matches!(result, Err(WhitelistError::Overlap(pattern)) if pattern == r"a\.B"));
    }

    #[test]
    fn test_covering_entries_are_rejected() {
        let result = Whitelist::builder().public_package("com.acme").internal_class("com.acme.Meter").build();
        assert!(matches!(
            result,
            Err(WhitelistError::OverlappingName { name, public, internal })
                if name == "com.acme.Meter" && public == r"com\.acme\..+" && internal == r"com\.acme\.Meter"
        ));

        let result = Whitelist::builder().public_package("com").internal_package("com.acme.runtime").build();
        assert!(matches!(
            result,
            Err(WhitelistError::OverlappingName { name, .. }) if name == "com.acme.runtime.Member"
        ));

        let result = Whitelist::builder()
            .extend_from(Whitelist::minimal())
            .internal_package("java.lang")
            .build();
        assert!(matches!(result, Err(WhitelistError::OverlappingName { .. })));

        let disjoint = Whitelist::builder().public_package("com.acme").internal_package("com.acmeish").build();
        assert!(disjoint.is_ok());
    }

    #[test]
    fn test_raw_patterns_prefer_public() {
        let whitelist = Whitelist::builder().public_pattern(r"com\..+").internal_pattern(r".+\.Meter").build().unwrap();
        assert_eq!(whitelist.lookup(&"com.acme.Meter".into()), Some(WhitelistKind::Public));
        assert_eq!(whitelist.lookup(&"org.acme.Meter".into()), Some(WhitelistKind::Internal));
    }

    #[test]
    fn test_representative_names() {
        assert_eq!(representative_name(&class_pattern("com.acme.Foo$Bar")).as_deref(), Some("com.acme.Foo$Bar"));
        assert_eq!(representative_name(&package_pattern("com.acme")).as_deref(), Some("com.acme.Member"));
        assert_eq!(representative_name(r"com\..+\.Meter"), None);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let result = Whitelist::builder().public_pattern("com.acme.(").build();
        assert!(matches!(result, Err(WhitelistError::InvalidPattern { pattern, .. }) if pattern == "com.acme.("));
    }

    #[test]
    fn test_first_match_reports_declared_pattern() {
        let patterns = NamePatterns::new([r"com\.acme\..+", r"com\..+"]).unwrap();
        assert_eq!(patterns.first_match("com.acme.Foo"), Some(r"com\.acme\..+"));
        assert_eq!(patterns.first_match("org.Foo"), None);
    }
}
