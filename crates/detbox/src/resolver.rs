use std::sync::Arc;

use crate::{AnalysisConfiguration, ClassName, Classification};

/// Maps original class names to their sandboxed counterparts and back.
///
/// The resolver is a stateless function object over an [`AnalysisConfiguration`]: pass-through
/// names map to themselves, every other name is prefixed with the sandbox namespace.
#[derive(Debug, Clone)]
pub struct ClassResolver {
    analysis: Arc<AnalysisConfiguration>,
}

impl ClassResolver {
    /// Creates a resolver over `analysis`.
    pub const fn new(analysis: Arc<AnalysisConfiguration>) -> Self {
        Self { analysis }
    }

    /// The analysis configuration the resolver consults.
    pub fn analysis(&self) -> &AnalysisConfiguration {
        &self.analysis
    }

    /// Classifies an original name.
    pub fn classify(&self, name: &ClassName) -> Classification {
        self.analysis.classify(name)
    }

    /// Returns the sandboxed name of an original name.
    ///
    /// Pass-through names and names already inside the sandbox namespace are returned unchanged,
    /// so resolving twice yields the same name.
    pub fn resolve(&self, name: &ClassName) -> ClassName {
        if self.is_sandboxed(name) || self.classify(name) == Classification::PassThrough {
            name.clone()
        } else {
            name.with_prefix(self.analysis.namespace())
        }
    }

    /// Returns the original name of a sandboxed name. Names outside the namespace are returned
    /// unchanged.
    pub fn reverse(&self, name: &ClassName) -> ClassName {
        name.strip_prefix(self.analysis.namespace()).unwrap_or_else(|| name.clone())
    }

    /// Returns `true` if `name` lies inside the sandbox namespace.
    pub fn is_sandboxed(&self, name: &ClassName) -> bool {
        name.starts_with(self.analysis.namespace())
    }

    /// Returns `true` if `name` is an engine-internal pass-through class.
    pub fn is_internal(&self, name: &ClassName) -> bool {
        self.analysis.is_internal(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ClassResolver {
        ClassResolver::new(Arc::new(AnalysisConfiguration::default()))
    }

    #[test]
    fn test_resolve_prefixes_rewritten_names() {
        let resolver = resolver();
        let name = ClassName::new("com.acme.Contract");
        let sandboxed = resolver.resolve(&name);
        assert_eq!(sandboxed, "sandbox.com.acme.Contract");
        assert_eq!(resolver.resolve(&sandboxed), sandboxed);
        assert_eq!(resolver.reverse(&sandboxed), name);
    }

    #[test]
    fn test_pass_through_names_map_to_themselves() {
        let resolver = resolver();
        let object = ClassName::new("java.lang.Object");
        assert_eq!(resolver.resolve(&object), object);
        assert_eq!(resolver.reverse(&object), object);
        assert!(!resolver.is_sandboxed(&object));
    }
}
