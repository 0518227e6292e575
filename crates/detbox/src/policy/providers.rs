use crate::{
    constants::{attributes, naming::SANDBOXED_MARKER},
    ClassDefinition, ClassName, CostKind, DefinitionProvider, PassError, ProviderContext,
};

/// Adds the marker interface every rewritten class carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkSandboxed;

impl DefinitionProvider for MarkSandboxed {
    fn name(&self) -> &'static str {
        "mark-sandboxed"
    }

    fn provide(&self, _context: &ProviderContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        let marker = ClassName::new(SANDBOXED_MARKER);
        if !class.interfaces.contains(&marker) {
            class.interfaces.push(marker);
        }
        Ok(())
    }
}

/// Records the thresholds the class was rewritten under.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExecutionProfile;

impl DefinitionProvider for RecordExecutionProfile {
    fn name(&self) -> &'static str {
        "record-execution-profile"
    }

    fn provide(&self, context: &ProviderContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        for cost in CostKind::ALL {
            let key = match cost {
                CostKind::Allocation => attributes::ALLOCATION_THRESHOLD,
                CostKind::Invocation => attributes::INVOCATION_THRESHOLD,
                CostKind::Jump => attributes::JUMP_THRESHOLD,
                CostKind::Throw => attributes::THROW_THRESHOLD,
            };
            class.attributes.insert(key.to_string(), context.profile.threshold(cost).to_string());
        }
        Ok(())
    }
}

/// Records the label of the source the class was read from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOrigin;

impl DefinitionProvider for RecordOrigin {
    fn name(&self) -> &'static str {
        "record-origin"
    }

    fn provide(&self, context: &ProviderContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        class.attributes.insert(attributes::ORIGIN.to_string(), context.origin.label().to_string());
        Ok(())
    }
}
