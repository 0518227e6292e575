use core::cell::RefCell;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use delegate::delegate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    ClassBytes, ClassDefinition, ClassLoadingError, ClassName, ClassResolver, ClassSource,
    Classification, LoadStage, MethodDefinition, PassContext, SandboxConfiguration,
    SourceClassLoader,
};

/// Where a loaded class came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassOrigin {
    /// The host environment's own class, loaded unmodified.
    Host,
    /// Rewritten from the class source with this label.
    Source(String),
    /// Rewritten from the host environment's bootstrap library.
    Bootstrap,
}

impl ClassOrigin {
    /// A short label for diagnostics and class attributes.
    pub fn label(&self) -> &str {
        match self {
            Self::Host => "host",
            Self::Source(label) => label,
            Self::Bootstrap => "bootstrap",
        }
    }
}

/// A class ready for execution: either a pass-through host class or a rewritten class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
    name: ClassName,
    original: ClassName,
    definition: ClassDefinition,
    origin: ClassOrigin,
}

impl LoadedClass {
    /// Wraps a host class. Its runtime and original names are the same.
    pub fn host(definition: ClassDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            original: definition.name.clone(),
            definition,
            origin: ClassOrigin::Host,
        }
    }

    /// The name the class carries at runtime.
    pub const fn name(&self) -> &ClassName {
        &self.name
    }

    /// The name the class was requested under.
    pub const fn original_name(&self) -> &ClassName {
        &self.original
    }

    /// The transformed definition.
    pub const fn definition(&self) -> &ClassDefinition {
        &self.definition
    }

    /// Where the class came from.
    pub const fn origin(&self) -> &ClassOrigin {
        &self.origin
    }

    /// Returns `true` if the class went through the rewriting pipeline.
    pub fn is_rewritten(&self) -> bool {
        self.origin != ClassOrigin::Host
    }

    /// The super class, as named inside the transformed definition.
    pub fn super_name(&self) -> Option<&ClassName> {
        self.definition.super_name.as_ref()
    }

    delegate! {
        to self.definition {
            /// Looks up a declared method by name and arity.
            pub fn method(&self, name: &str, arity: u8) -> Option<&MethodDefinition>;
            /// Returns `true` if the class declares the field.
            pub fn has_field(&self, name: &str) -> bool;
        }
    }
}

/// Loads classes for one runtime context.
///
/// Pass-through names resolve to the host's own classes. Every other name is read from the
/// class sources and sent through the configured rules, emitters and definition providers, in
/// that order, before being renamed into the sandbox namespace. Results are cached by original
/// name for the lifetime of the loader, so loading a class twice returns the identical `Arc`.
/// Failures are returned as they are and never cached.
#[derive(Debug)]
pub struct SandboxClassLoader {
    configuration: Arc<SandboxConfiguration>,
    resolver: ClassResolver,
    sources: SourceClassLoader,
    cache: RefCell<BTreeMap<ClassName, Arc<LoadedClass>>>,
}

impl SandboxClassLoader {
    /// Creates a loader reading from `sources`.
    pub fn new(configuration: Arc<SandboxConfiguration>, sources: Vec<ClassSource>) -> Self {
        let analysis = configuration.analysis().clone();
        let sources = SourceClassLoader::new(sources, analysis.shared_host());
        Self { configuration, resolver: ClassResolver::new(analysis), sources, cache: RefCell::default() }
    }

    /// The configuration the loader applies.
    pub fn configuration(&self) -> &SandboxConfiguration {
        &self.configuration
    }

    /// The resolver of the loader.
    pub const fn resolver(&self) -> &ClassResolver {
        &self.resolver
    }

    /// The source loader raw images are read from.
    pub const fn sources(&self) -> &SourceClassLoader {
        &self.sources
    }

    /// Returns the cached class of an original name without loading it.
    pub fn cached(&self, name: &ClassName) -> Option<Arc<LoadedClass>> {
        self.cache.borrow().get(name).cloned()
    }

    /// Returns the original names of every class loaded so far.
    pub fn loaded_classes(&self) -> BTreeSet<ClassName> {
        self.cache.borrow().keys().cloned().collect()
    }

    /// Loads a class by its original name.
    pub fn load(&self, name: &ClassName) -> Result<Arc<LoadedClass>, ClassLoadingError> {
        if let Some(class) = self.cached(name) {
            return Ok(class)
        }

        let class = match self.resolver.classify(name) {
            Classification::Reject(reason) => {
                warn!(class = %name, %reason, "rejected class");
                return Err(ClassLoadingError::Rejected { name: name.clone(), reason })
            }
            Classification::PassThrough => {
                debug!(class = %name, "passing class through from the host");
                self.configuration.analysis().host().host_class(name).ok_or_else(|| {
                    ClassLoadingError::ClassNotFound {
                        name: name.clone(),
                        entry: name.entry_path(),
                        searched: vec![ClassOrigin::Host.label().to_string()],
                    }
                })?
            }
            Classification::Rewrite => {
                let class = self.rewrite(name).inspect_err(|error| {
                    warn!(class = %name, stage = %error.stage(), %error, "failed to load class");
                })?;
                debug!(class = %name, sandboxed = %class.name, origin = class.origin.label(), "rewrote class");
                Arc::new(class)
            }
        };

        self.cache.borrow_mut().insert(name.clone(), class.clone());
        Ok(class)
    }

    /// Loads a class by the name it carries inside rewritten code: a sandboxed name or a
    /// pass-through name.
    pub fn load_runtime(&self, name: &ClassName) -> Result<Arc<LoadedClass>, ClassLoadingError> {
        self.load(&self.resolver.reverse(name))
    }

    /// Returns `true` if instances of `from` may be used as `to`. Both are runtime names.
    ///
    /// Walks the super chain of `from` through this loader, loading classes on the way.
    pub fn is_assignable(&self, from: &ClassName, to: &ClassName) -> Result<bool, ClassLoadingError> {
        let target = self.resolver.reverse(to);
        let mut visited = BTreeSet::new();
        let mut current = Some(from.clone());
        while let Some(name) = current.take() {
            if !visited.insert(name.clone()) {
                break
            }
            let class = self.load_runtime(&name)?;
            if class.original_name() == &target ||
                class
                    .definition()
                    .interfaces
                    .iter()
                    .any(|interface| self.resolver.reverse(interface) == target)
            {
                return Ok(true)
            }
            current = class.super_name().cloned();
        }
        Ok(false)
    }

    fn rewrite(&self, name: &ClassName) -> Result<LoadedClass, ClassLoadingError> {
        let ClassBytes { bytes, origin } = self.sources.read(name)?;
        let mut definition = ClassDefinition::decode(&bytes)
            .map_err(|source| ClassLoadingError::ClassFormat { name: name.clone(), source })?;
        if &definition.name != name {
            return Err(ClassLoadingError::NameMismatch { name: name.clone(), declared: definition.name })
        }

        let context = PassContext {
            resolver: &self.resolver,
            profile: self.configuration.profile(),
            origin: &origin,
        };
        let failed = |stage: LoadStage, message: String| ClassLoadingError::Pipeline {
            name: name.clone(),
            stage,
            message,
        };

        for rule in self.configuration.rules() {
            rule.validate(&context, &definition)
                .map_err(|violation| failed(LoadStage::Rule(rule.name().to_string()), violation.message))?;
        }
        for emitter in self.configuration.emitters() {
            emitter
                .emit(&context, &mut definition)
                .map_err(|e| failed(LoadStage::Emitter(emitter.name().to_string()), e.0))?;
        }
        for provider in self.configuration.definition_providers() {
            provider.provide(&context, &mut definition).map_err(|e| {
                failed(LoadStage::DefinitionProvider(provider.name().to_string()), e.0)
            })?;
        }

        definition.name = self.resolver.resolve(name);
        Ok(LoadedClass { name: definition.name.clone(), original: name.clone(), definition, origin })
    }
}
