//! Tests for the thread-bound runtime context and the host runtime contract.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use detbox::{
    test_utils::{memory_source, standard_analysis, ClassBuilder, CodeBuilder},
    ClassDefinition, CostKind, ExecutionFailure, ExecutionFault, ExecutionProfile, ExecutionState,
    FatalSignal, HostRuntime, Instruction, LoadedClass, RuntimeCost, SandboxConfiguration,
    SandboxExecutor, SandboxRuntimeContext,
};

fn configuration(profile: ExecutionProfile) -> Arc<SandboxConfiguration> {
    Arc::new(SandboxConfiguration::default_with(standard_analysis()).with_profile(profile))
}

fn noop_class() -> ClassDefinition {
    ClassBuilder::new("com.acme.Noop")
        .entry_point(CodeBuilder::new(1).push(Instruction::Load(0)).push(Instruction::ReturnValue))
        .build()
}

/// A runtime that charges jumps and swallows every error it sees, like a sandboxed
/// `catch (Throwable t) {}` around the whole program.
#[derive(Debug)]
struct SwallowingRuntime {
    jumps: u64,
}

impl HostRuntime for SwallowingRuntime {
    type Input = ();
    type Output = &'static str;

    fn run(
        &self,
        context: &SandboxRuntimeContext,
        _entry: &Arc<LoadedClass>,
        _input: (),
    ) -> Result<&'static str, ExecutionFault> {
        for _ in 0..self.jumps {
            let _ = context.runtime_costs().record(CostKind::Jump, 1);
        }
        Ok("swallowed")
    }
}

#[test]
fn test_swallowed_violation_still_terminates() {
    let class = noop_class();
    let executor =
        SandboxExecutor::new(configuration(ExecutionProfile::UNLIMITED.with_jumps(3)), SwallowingRuntime { jumps: 10 });
    let exception = executor.run(vec![memory_source("test", [&class])], &class.name, ()).unwrap_err();

    match exception.cause {
        ExecutionFailure::ThresholdViolation(violation) => assert_eq!(violation.value, 3),
        other => panic!("expected a threshold violation, got {other:?}"),
    }
    // the latched counter stops accumulating
    assert_eq!(exception.costs.jumps, 3);
}

#[test]
fn test_runtime_without_violation_completes() {
    let class = noop_class();
    let executor =
        SandboxExecutor::new(configuration(ExecutionProfile::UNLIMITED.with_jumps(11)), SwallowingRuntime { jumps: 10 });
    let summary = executor.run(vec![memory_source("test", [&class])], &class.name, ()).unwrap();
    assert_eq!(summary.result, "swallowed");
    assert_eq!(summary.costs.jumps, 10);
}

#[test]
fn test_contexts_do_not_share_classes_or_costs() {
    let class = noop_class();
    let configuration = configuration(ExecutionProfile::DEFAULT);

    let first = SandboxRuntimeContext::with(configuration.clone(), vec![memory_source("test", [&class])], |context| {
        context.runtime_costs().record(CostKind::Allocation, 42).unwrap();
        context.class_loader().load(&class.name).unwrap()
    });
    let second = SandboxRuntimeContext::with(configuration, vec![memory_source("test", [&class])], |context| {
        assert_eq!(context.runtime_costs().allocation_cost.value(), 0);
        assert!(context.class_loader().loaded_classes().is_empty());
        context.class_loader().load(&class.name).unwrap()
    });

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.definition(), second.definition());
}

#[test]
fn test_binding_is_cleared_after_panic() {
    let result = catch_unwind(AssertUnwindSafe(|| {
        SandboxRuntimeContext::with(configuration(ExecutionProfile::DEFAULT), Vec::new(), |_| {
            panic!("sandboxed body failed")
        })
    }));
    assert!(result.is_err());
    assert!(SandboxRuntimeContext::try_current().is_none());
}

#[test]
fn test_current_is_the_bound_context() {
    SandboxRuntimeContext::with(configuration(ExecutionProfile::DEFAULT), Vec::new(), |context| {
        let current = SandboxRuntimeContext::current();
        current.runtime_costs().record(CostKind::Throw, 2).unwrap();
        assert_eq!(context.runtime_costs().throw_cost.value(), 2);
        assert_eq!(current.state(), ExecutionState::Created);
    });
}

#[test]
#[should_panic(expected = "no sandbox runtime context is bound to this thread")]
fn test_current_without_binding_panics() {
    SandboxRuntimeContext::current();
}

#[test]
fn test_check_catch_walks_super_chain() {
    SandboxRuntimeContext::with(configuration(ExecutionProfile::DEFAULT), Vec::new(), |context| {
        assert!(context.check_catch(&"sandbox.java.lang.ArithmeticException".into(), "").is_ok());
        assert!(context.check_catch(&"java.lang.Exception".into(), "").is_ok());
        assert!(matches!(
            context.check_catch(&"sandbox.java.lang.StackOverflowError".into(), "deep"),
            Err(FatalSignal::Uncatchable { class, message }) if class == "java.lang.StackOverflowError" && message == "deep"
        ));
    });
}

#[test]
fn test_check_catch_after_violation_is_fatal() {
    SandboxRuntimeContext::with(configuration(ExecutionProfile::UNLIMITED.with_throws(1)), Vec::new(), |context| {
        let violation = context.runtime_costs().record(CostKind::Throw, 1).unwrap_err();
        assert_eq!(
            context.check_catch(&"java.lang.Exception".into(), ""),
            Err(FatalSignal::Threshold(violation))
        );
    });
}
