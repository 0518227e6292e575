use crate::{
    constants::naming::{CONSTRUCTOR, FINALIZER},
    method_bodies, ClassDefinition, ClassName, Instruction, MemberReference, Rule, RuleContext,
    RuleViolation,
};

/// Source code may not contain engine instrumentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisallowReservedInstructions;

impl Rule for DisallowReservedInstructions {
    fn name(&self) -> &'static str {
        "disallow-reserved-instructions"
    }

    fn validate(&self, _context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation> {
        for (method, code) in method_bodies(class) {
            if let Some(position) =
                code.instructions.iter().position(|instruction| matches!(instruction, Instruction::Sandbox(_)))
            {
                return Err(RuleViolation::new(format!(
                    "Reserved sandbox instruction in {}.{} at {position}",
                    class.name,
                    method.signature()
                )))
            }
        }
        Ok(())
    }
}

/// Native methods escape metering and are not allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisallowNativeMethods;

impl Rule for DisallowNativeMethods {
    fn name(&self) -> &'static str {
        "disallow-native-methods"
    }

    fn validate(&self, _context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation> {
        match class.methods.iter().find(|method| method.is_native()) {
            Some(method) => Err(RuleViolation::new(format!(
                "Native method {}.{} is not allowed",
                class.name,
                method.signature()
            ))),
            None => Ok(()),
        }
    }
}

/// Finalizers run at the discretion of the host's collector and are not allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisallowFinalizerMethods;

impl Rule for DisallowFinalizerMethods {
    fn name(&self) -> &'static str {
        "disallow-finalizer-methods"
    }

    fn validate(&self, _context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation> {
        match class.methods.iter().find(|method| {
            method.name == FINALIZER && method.arity == 0 && !method.is_static()
        }) {
            Some(_) => Err(RuleViolation::new(format!("Finalizer in {} is not allowed", class.name))),
            None => Ok(()),
        }
    }
}

/// Sandboxed code may not reference engine-internal classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisallowInternalReferences;

impl Rule for DisallowInternalReferences {
    fn name(&self) -> &'static str {
        "disallow-internal-references"
    }

    fn validate(&self, context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation> {
        match class
            .referenced_classes()
            .into_iter()
            .find(|name| context.resolver.is_internal(&context.resolver.reverse(name)))
        {
            Some(name) => Err(RuleViolation::new(format!(
                "Disallowed reference to internal class {name} in {}",
                class.name
            ))),
            None => Ok(()),
        }
    }
}

/// Source images name classes by their original names; the sandbox namespace is reserved for
/// rewritten code.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisallowSandboxedReferences;

impl Rule for DisallowSandboxedReferences {
    fn name(&self) -> &'static str {
        "disallow-sandboxed-references"
    }

    fn validate(&self, context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation> {
        match class.referenced_classes().into_iter().find(|name| context.resolver.is_sandboxed(name)) {
            Some(name) => Err(RuleViolation::new(format!(
                "Reference to {name} in {} uses the reserved sandbox namespace",
                class.name
            ))),
            None => Ok(()),
        }
    }
}

/// A member, or every member, of a class or package that sandboxed code may not reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedApi {
    /// A class name, or a package followed by `.*` to cover every class below it.
    pub owner: String,
    /// The member name, or `None` to deny every member and instantiation.
    pub member: Option<String>,
}

impl DeniedApi {
    /// Denies one member of a class.
    pub fn member(owner: &str, member: &str) -> Self {
        Self { owner: owner.to_string(), member: Some(member.to_string()) }
    }

    /// Denies every member of a class, or of every class of a package when `owner` ends with `.*`.
    pub fn all(owner: &str) -> Self {
        Self { owner: owner.to_string(), member: None }
    }

    fn covers(&self, owner: &ClassName, member: &str) -> bool {
        let owner_matches = match self.owner.strip_suffix(".*") {
            Some(package) => owner.package() == package || owner.package().starts_with(&format!("{package}.")),
            None => owner == self.owner.as_str(),
        };
        owner_matches && self.member.as_deref().is_none_or(|denied| denied == member)
    }
}

/// Rejects references to APIs that would break determinism or isolation: reflection, class
/// loaders, threads, monitors and the wall clock.
#[derive(Debug, Clone)]
pub struct DisallowApiReferences {
    denied: Vec<DeniedApi>,
}

impl DisallowApiReferences {
    /// Creates the rule over an explicit deny list.
    pub const fn new(denied: Vec<DeniedApi>) -> Self {
        Self { denied }
    }

    /// Returns the rule with another denied API.
    pub fn with(mut self, denied: DeniedApi) -> Self {
        self.denied.push(denied);
        self
    }

    /// The deny list.
    pub fn denied(&self) -> &[DeniedApi] {
        &self.denied
    }

    fn is_denied(&self, owner: &ClassName, member: &str) -> bool {
        self.denied.iter().any(|denied| denied.covers(owner, member))
    }
}

impl Default for DisallowApiReferences {
    fn default() -> Self {
        Self::new(vec![
            DeniedApi::member("java.lang.Object", "wait"),
            DeniedApi::member("java.lang.Object", "notify"),
            DeniedApi::member("java.lang.Object", "notifyAll"),
            DeniedApi::member("java.lang.Object", "getClass"),
            DeniedApi::member("java.lang.System", "currentTimeMillis"),
            DeniedApi::member("java.lang.System", "nanoTime"),
            DeniedApi::member("java.lang.System", "identityHashCode"),
            DeniedApi::member("java.lang.System", "exit"),
            DeniedApi::member("java.lang.System", "gc"),
            DeniedApi::all("java.lang.Class"),
            DeniedApi::all("java.lang.ClassLoader"),
            DeniedApi::all("java.lang.Thread"),
            DeniedApi::all("java.lang.Runtime"),
            DeniedApi::all("java.lang.reflect.*"),
            DeniedApi::all("java.lang.invoke.*"),
            DeniedApi::all("java.util.concurrent.*"),
        ])
    }
}

impl Rule for DisallowApiReferences {
    fn name(&self) -> &'static str {
        "disallow-api-references"
    }

    fn validate(&self, context: &RuleContext<'_>, class: &ClassDefinition) -> Result<(), RuleViolation> {
        for (_, code) in method_bodies(class) {
            for instruction in &code.instructions {
                let reference = match instruction {
                    Instruction::Invoke { owner, name, arity, .. } => {
                        MemberReference { owner: owner.clone(), name: name.clone(), arity: Some(*arity) }
                    }
                    Instruction::GetStatic { owner, field } | Instruction::PutStatic { owner, field } => {
                        MemberReference { owner: owner.clone(), name: field.clone(), arity: None }
                    }
                    Instruction::New(owner) => {
                        MemberReference { owner: owner.clone(), name: CONSTRUCTOR.to_string(), arity: None }
                    }
                    _ => continue,
                };
                if self.is_denied(&context.resolver.reverse(&reference.owner), &reference.name) {
                    return Err(RuleViolation::new(format!("Disallowed reference to API; {reference}")))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        test_utils::{ClassBuilder, CodeBuilder},
        AnalysisConfiguration, ClassOrigin, ClassResolver, ExecutionProfile, MemberAccess,
        PassContext, SandboxOp, Whitelist,
    };

    fn check(rule: &dyn Rule, class: &ClassDefinition) -> Result<(), RuleViolation> {
        let analysis = AnalysisConfiguration::builder()
            .whitelist(
                Whitelist::builder()
                    .extend_from(Whitelist::minimal())
                    .internal_package("detbox.runtime")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let resolver = ClassResolver::new(Arc::new(analysis));
        let context = PassContext {
            resolver: &resolver,
            profile: &ExecutionProfile::DEFAULT,
            origin: &ClassOrigin::Bootstrap,
        };
        rule.validate(&context, class)
    }

    fn calling(owner: &str, name: &str, arity: u8) -> ClassDefinition {
        let code = (0..arity)
            .fold(CodeBuilder::new(1), |code, _| code.push(Instruction::Const(0)))
            .invoke_static(owner, name, arity)
            .push(Instruction::Pop)
            .push(Instruction::Return);
        ClassBuilder::new("com.acme.Caller").static_method("run", 0, false, code).build()
    }

    #[test]
    fn test_reserved_instructions() {
        let code = CodeBuilder::new(0)
            .push(Instruction::Sandbox(SandboxOp::CheckCatch))
            .push(Instruction::Return);
        let class = ClassBuilder::new("com.acme.Sneaky").static_method("run", 0, false, code).build();
        let violation = check(&DisallowReservedInstructions, &class).unwrap_err();
        assert!(violation.message.contains("Reserved sandbox instruction"));
    }

    #[test]
    fn test_native_and_finalizer_methods() {
        let native = ClassBuilder::new("com.acme.Native")
            .native_method("peek", 1, MemberAccess::PUBLIC | MemberAccess::STATIC)
            .build();
        assert!(check(&DisallowNativeMethods, &native).is_err());

        let body = CodeBuilder::new(1).push(Instruction::Return);
        let finalizer = ClassBuilder::new("com.acme.Finalizing").method("finalize", 0, false, body).build();
        assert!(check(&DisallowFinalizerMethods, &finalizer).is_err());
        assert!(check(&DisallowFinalizerMethods, &native).is_ok());
    }

    #[test]
    fn test_internal_references() {
        let class = calling("detbox.runtime.Meter", "charge", 0);
        let violation = check(&DisallowInternalReferences, &class).unwrap_err();
        assert!(violation.message.contains("detbox.runtime.Meter"));
        assert!(check(&DisallowInternalReferences, &calling("com.acme.Helper", "help", 0)).is_ok());

        let prefixed = calling("sandbox.detbox.runtime.Meter", "charge", 0);
        let violation = check(&DisallowInternalReferences, &prefixed).unwrap_err();
        assert!(violation.message.contains("sandbox.detbox.runtime.Meter"));
    }

    #[test]
    fn test_sandboxed_references() {
        let violation =
            check(&DisallowSandboxedReferences, &calling("sandbox.com.acme.Helper", "help", 0)).unwrap_err();
        assert_eq!(
            violation.message,
            "Reference to sandbox.com.acme.Helper in com.acme.Caller uses the reserved sandbox namespace"
        );
        assert!(check(&DisallowSandboxedReferences, &calling("com.acme.Helper", "help", 0)).is_ok());
        assert!(check(&DisallowSandboxedReferences, &calling("sandboxes.Helper", "help", 0)).is_ok());

        let extending = ClassBuilder::new("com.acme.Child").super_class("sandbox.java.lang.Object").build();
        assert!(check(&DisallowSandboxedReferences, &extending).is_err());
    }

    #[test]
    fn test_api_references() {
        let rule = DisallowApiReferences::default();
        let violation = check(&rule, &calling("java.lang.Object", "wait", 0)).unwrap_err();
        assert_eq!(violation.message, "Disallowed reference to API; java.lang.Object.wait(0)");
        assert!(check(&rule, &calling("java.lang.reflect.Method", "invoke", 2)).is_err());
        assert!(check(&rule, &calling("java.lang.Object", "hashCode", 0)).is_ok());
        assert!(check(&rule, &calling("java.lang.Threadlike", "run", 0)).is_ok());

        let violation = check(&rule, &calling("sandbox.java.lang.System", "currentTimeMillis", 0)).unwrap_err();
        assert_eq!(
            violation.message,
            "Disallowed reference to API; sandbox.java.lang.System.currentTimeMillis(0)"
        );
        assert!(check(&rule, &calling("sandbox.java.lang.Thread", "start", 0)).is_err());

        let custom = DisallowApiReferences::new(Vec::new()).with(DeniedApi::member("com.acme.Clock", "now"));
        assert!(check(&custom, &calling("com.acme.Clock", "now", 0)).is_err());
        assert!(check(&custom, &calling("java.lang.Object", "wait", 0)).is_ok());
    }
}
