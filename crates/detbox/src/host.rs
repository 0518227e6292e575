use core::fmt;
use std::{collections::BTreeMap, sync::Arc};

use auto_impl::auto_impl;

use crate::{ClassDefinition, ClassFormatError, ClassName, LoadedClass};

/// The class world of the pre-existing managed runtime the sandbox runs inside.
///
/// The host supplies two things: its own loaded classes, which whitelisted names pass through
/// to unmodified, and the bytes of its bootstrap library, which non-whitelisted library classes
/// are rewritten from when no class source declares them.
#[auto_impl(&, Box, Arc)]
pub trait HostEnvironment: fmt::Debug + Send + Sync {
    /// Returns the host's own class. Pass-through loads return this exact `Arc`.
    fn host_class(&self, name: &ClassName) -> Option<Arc<LoadedClass>>;

    /// Returns the raw image of a bootstrap library class.
    fn class_bytes(&self, name: &ClassName) -> Option<Vec<u8>>;
}

/// An in-memory [`HostEnvironment`].
#[derive(Debug, Clone, Default)]
pub struct HostClasses {
    classes: BTreeMap<ClassName, Arc<LoadedClass>>,
    bootstrap: BTreeMap<ClassName, Vec<u8>>,
}

impl HostClasses {
    /// A host without any class.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers a host class, replacing any previous class of the same name.
    pub fn insert_class(&mut self, definition: ClassDefinition) -> Arc<LoadedClass> {
        let class = Arc::new(LoadedClass::host(definition));
        self.classes.insert(class.name().clone(), class.clone());
        class
    }

    /// Registers a host class and returns the host.
    pub fn with_class(mut self, definition: ClassDefinition) -> Self {
        self.insert_class(definition);
        self
    }

    /// Registers the raw image of a bootstrap library class.
    pub fn insert_bootstrap_bytes(&mut self, name: impl Into<ClassName>, bytes: Vec<u8>) {
        self.bootstrap.insert(name.into(), bytes);
    }

    /// Encodes a definition and registers it as a bootstrap library class.
    pub fn with_bootstrap_class(mut self, definition: &ClassDefinition) -> Result<Self, ClassFormatError> {
        let bytes = definition.encode()?;
        self.insert_bootstrap_bytes(definition.name.clone(), bytes);
        Ok(self)
    }

    /// Returns the names of every registered host class.
    pub fn class_names(&self) -> impl Iterator<Item = &ClassName> {
        self.classes.keys()
    }
}

impl HostEnvironment for HostClasses {
    fn host_class(&self, name: &ClassName) -> Option<Arc<LoadedClass>> {
        self.classes.get(name).cloned()
    }

    fn class_bytes(&self, name: &ClassName) -> Option<Vec<u8>> {
        self.bootstrap.get(name).cloned()
    }
}
