use core::fmt;

use auto_impl::auto_impl;

use crate::{
    AnalysisConfiguration, ClassDefinition, ClassName, ClassOrigin, ClassResolver, Code,
    CodeEditor, ExecutionProfile, MethodDefinition,
};

/// A structural constraint a class violates. Loading the class fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RuleViolation {
    /// Human-readable description of the violation.
    pub message: String,
}

impl RuleViolation {
    /// Creates a violation.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// An emitter or definition provider could not process a class.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PassError(pub String);

/// What every pass of the pipeline may consult while processing one class.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// The resolver of the loading context.
    pub resolver: &'a ClassResolver,
    /// The profile of the loading context.
    pub profile: &'a ExecutionProfile,
    /// Where the class image was read from.
    pub origin: &'a ClassOrigin,
}

impl PassContext<'_> {
    /// The analysis configuration of the loading context.
    pub fn analysis(&self) -> &AnalysisConfiguration {
        self.resolver.analysis()
    }

    /// Returns the sandboxed name of a class reference.
    pub fn resolve(&self, name: &ClassName) -> ClassName {
        self.resolver.resolve(name)
    }
}

/// The context handed to [`Rule::validate`].
pub type RuleContext<'a> = PassContext<'a>;
/// The context handed to [`Emitter::emit`].
pub type EmitterContext<'a> = PassContext<'a>;
/// The context handed to [`DefinitionProvider::provide`].
pub type ProviderContext<'a> = PassContext<'a>;

/// A structural validator. Rules run first, in declaration order, on the decoded class.
#[auto_impl(&, Box, Arc)]
pub trait Rule: fmt::Debug + Send + Sync {
    /// The stable name of the rule, unique within a configuration.
    fn name(&self) -> &'static str;

    /// Checks the class.
    fn validate(&self, context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation>;
}

/// An instruction rewriting pass. Emitters run after every rule has passed, in declaration
/// order.
#[auto_impl(&, Box, Arc)]
pub trait Emitter: fmt::Debug + Send + Sync {
    /// The stable name of the emitter, unique within a configuration.
    fn name(&self) -> &'static str;

    /// Rewrites the class in place.
    fn emit(&self, context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError>;
}

/// A metadata-only pass. Providers run last and must not alter instructions.
#[auto_impl(&, Box, Arc)]
pub trait DefinitionProvider: fmt::Debug + Send + Sync {
    /// The stable name of the provider, unique within a configuration.
    fn name(&self) -> &'static str;

    /// Attaches metadata to the class.
    fn provide(&self, context: &ProviderContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError>;
}

/// Runs `edit` over the body of every method that has one, finishing each editor afterwards.
pub fn edit_methods(
    class: &mut ClassDefinition,
    mut edit: impl FnMut(&MethodDefinition, &mut CodeEditor<'_>),
) {
    for method in &mut class.methods {
        let Some(mut code) = method.code.take() else { continue };
        let mut editor = CodeEditor::new(&mut code);
        edit(method, &mut editor);
        editor.finish();
        method.code = Some(code);
    }
}

/// Returns every method body of a class together with its method.
pub fn method_bodies(class: &ClassDefinition) -> impl Iterator<Item = (&MethodDefinition, &Code)> {
    class.methods.iter().filter_map(|method| method.code.as_ref().map(|code| (method, code)))
}
