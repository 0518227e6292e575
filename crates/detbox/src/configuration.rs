use std::{collections::BTreeSet, sync::Arc};

use crate::{
    policy, AnalysisConfiguration, ConfigurationError, DefinitionProvider, Emitter,
    ExecutionProfile, Rule,
};

/// The immutable assembly of everything a sandbox applies: the [`ExecutionProfile`], the ordered
/// rules, emitters and definition providers, and the [`AnalysisConfiguration`].
///
/// A configuration is built once and shared read-only, through an `Arc`, by every
/// [`SandboxRuntimeContext`](crate::SandboxRuntimeContext) opened with it. The order of the
/// passes is part of the configuration: rewriting passes do not commute.
///
/// # Presets
///
/// - [`SandboxConfiguration::default_with`]: the built-in policy and the `DEFAULT` profile
/// - [`SandboxConfiguration::unlimited`]: the built-in policy without limits
/// - [`SandboxConfiguration::empty`]: no passes at all and no limits
///
/// # Usage
///
/// ```rust
/// use detbox::{AnalysisConfiguration, ExecutionProfile, SandboxConfiguration};
///
/// let configuration = SandboxConfiguration::default_with(AnalysisConfiguration::default())
///     .with_profile(ExecutionProfile::DEFAULT.with_jumps(10_000));
/// assert_eq!(configuration.rules().len(), 6);
/// ```
#[derive(Debug, Clone)]
pub struct SandboxConfiguration {
    profile: ExecutionProfile,
    rules: Vec<Arc<dyn Rule>>,
    emitters: Vec<Arc<dyn Emitter>>,
    definition_providers: Vec<Arc<dyn DefinitionProvider>>,
    analysis: Arc<AnalysisConfiguration>,
}

impl SandboxConfiguration {
    /// Assembles a configuration from its parts, checking that component names are unique.
    pub fn of(
        profile: ExecutionProfile,
        rules: Vec<Arc<dyn Rule>>,
        emitters: Vec<Arc<dyn Emitter>>,
        definition_providers: Vec<Arc<dyn DefinitionProvider>>,
        analysis: AnalysisConfiguration,
    ) -> Result<Self, ConfigurationError> {
        SandboxConfigurationBuilder { profile, rules, emitters, definition_providers, analysis }.build()
    }

    /// Returns a builder with no passes and the `DEFAULT` profile.
    pub fn builder(analysis: AnalysisConfiguration) -> SandboxConfigurationBuilder {
        SandboxConfigurationBuilder {
            profile: ExecutionProfile::DEFAULT,
            rules: Vec::new(),
            emitters: Vec::new(),
            definition_providers: Vec::new(),
            analysis,
        }
    }

    /// The built-in policy with the `DEFAULT` profile.
    pub fn default_with(analysis: AnalysisConfiguration) -> Self {
        Self {
            profile: ExecutionProfile::DEFAULT,
            rules: policy::default_rules(),
            emitters: policy::default_emitters(),
            definition_providers: policy::default_definition_providers(),
            analysis: Arc::new(analysis),
        }
    }

    /// The built-in policy with the `UNLIMITED` profile.
    pub fn unlimited(analysis: AnalysisConfiguration) -> Self {
        Self::default_with(analysis).with_profile(ExecutionProfile::UNLIMITED)
    }

    /// No passes and the `UNLIMITED` profile. Classes are renamed into the sandbox namespace but
    /// otherwise loaded as they are.
    pub fn empty(analysis: AnalysisConfiguration) -> Self {
        Self {
            profile: ExecutionProfile::UNLIMITED,
            rules: Vec::new(),
            emitters: Vec::new(),
            definition_providers: Vec::new(),
            analysis: Arc::new(analysis),
        }
    }

    /// Returns a copy of the configuration with another profile. The passes and the analysis
    /// configuration are shared.
    pub fn with_profile(&self, profile: ExecutionProfile) -> Self {
        Self { profile, ..self.clone() }
    }

    /// The execution profile.
    pub const fn profile(&self) -> &ExecutionProfile {
        &self.profile
    }

    /// The rules, in application order.
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// The emitters, in application order.
    pub fn emitters(&self) -> &[Arc<dyn Emitter>] {
        &self.emitters
    }

    /// The definition providers, in application order.
    pub fn definition_providers(&self) -> &[Arc<dyn DefinitionProvider>] {
        &self.definition_providers
    }

    /// The analysis configuration.
    pub const fn analysis(&self) -> &Arc<AnalysisConfiguration> {
        &self.analysis
    }
}

/// Builder for a [`SandboxConfiguration`].
#[derive(Debug)]
pub struct SandboxConfigurationBuilder {
    profile: ExecutionProfile,
    rules: Vec<Arc<dyn Rule>>,
    emitters: Vec<Arc<dyn Emitter>>,
    definition_providers: Vec<Arc<dyn DefinitionProvider>>,
    analysis: AnalysisConfiguration,
}

impl SandboxConfigurationBuilder {
    /// Sets the execution profile.
    pub fn profile(mut self, profile: ExecutionProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Appends a rule.
    pub fn rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Appends rules.
    pub fn rules(mut self, rules: impl IntoIterator<Item = Arc<dyn Rule>>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Appends an emitter.
    pub fn emitter(mut self, emitter: impl Emitter + 'static) -> Self {
        self.emitters.push(Arc::new(emitter));
        self
    }

    /// Appends emitters.
    pub fn emitters(mut self, emitters: impl IntoIterator<Item = Arc<dyn Emitter>>) -> Self {
        self.emitters.extend(emitters);
        self
    }

    /// Appends a definition provider.
    pub fn definition_provider(mut self, provider: impl DefinitionProvider + 'static) -> Self {
        self.definition_providers.push(Arc::new(provider));
        self
    }

    /// Appends definition providers.
    pub fn definition_providers(
        mut self,
        providers: impl IntoIterator<Item = Arc<dyn DefinitionProvider>>,
    ) -> Self {
        self.definition_providers.extend(providers);
        self
    }

    /// Builds the configuration. Fails if two components of the same kind share a name.
    pub fn build(self) -> Result<SandboxConfiguration, ConfigurationError> {
        check_unique("rule", self.rules.iter().map(|rule| rule.name()))?;
        check_unique("emitter", self.emitters.iter().map(|emitter| emitter.name()))?;
        check_unique(
            "definition provider",
            self.definition_providers.iter().map(|provider| provider.name()),
        )?;
        Ok(SandboxConfiguration {
            profile: self.profile,
            rules: self.rules,
            emitters: self.emitters,
            definition_providers: self.definition_providers,
            analysis: Arc::new(self.analysis),
        })
    }
}

fn check_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigurationError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigurationError::DuplicateComponent { kind, name: name.to_string() })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DisallowNativeMethods, MarkSandboxed, TraceJumps};

    #[test]
    fn test_presets() {
        let default = SandboxConfiguration::default_with(AnalysisConfiguration::default());
        assert_eq!(default.profile(), &ExecutionProfile::DEFAULT);
        assert!(!default.emitters().is_empty());

        let unlimited = SandboxConfiguration::unlimited(AnalysisConfiguration::default());
        assert_eq!(unlimited.profile(), &ExecutionProfile::UNLIMITED);
        assert_eq!(unlimited.emitters().len(), default.emitters().len());

        let empty = SandboxConfiguration::empty(AnalysisConfiguration::default());
        assert!(empty.rules().is_empty() && empty.emitters().is_empty());
        assert!(empty.definition_providers().is_empty());
    }

    #[test]
    fn test_default_policy_names_are_unique() {
        let builder = SandboxConfiguration::builder(AnalysisConfiguration::default())
            .rules(policy::default_rules())
            .emitters(policy::default_emitters())
            .definition_providers(policy::default_definition_providers());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let result = SandboxConfiguration::builder(AnalysisConfiguration::default())
            .rule(DisallowNativeMethods)
            .emitter(TraceJumps)
            .definition_provider(MarkSandboxed)
            .rule(DisallowNativeMethods)
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::DuplicateComponent { kind: "rule", name }) if name == "disallow-native-methods"
        ));
    }

    #[test]
    fn test_of_preserves_order() {
        let configuration = SandboxConfiguration::of(
            ExecutionProfile::UNLIMITED,
            policy::default_rules(),
            policy::default_emitters(),
            Vec::new(),
            AnalysisConfiguration::default(),
        )
        .unwrap();
        let names: Vec<_> = configuration.emitters().iter().map(|emitter| emitter.name()).collect();
        assert_eq!(names.last(), Some(&"rewrite-type-references"));
    }
}
