//! Tests for loading classes through the rewriting pipeline.

use std::{fs, sync::Arc};

use detbox::{
    constants::{attributes, naming::SANDBOXED_MARKER},
    test_utils::{memory_source, standard_analysis, standard_configuration, ClassBuilder, CodeBuilder},
    ArchiveIndex, ClassDefinition, ClassLoadingError, ClassName, ClassOrigin, ClassSource,
    CostKind, ExecutionProfile, Instruction, LoadStage, RejectReason, SandboxClassLoader, SandboxConfiguration,
    SandboxOp,
};
use rstest::rstest;

fn counter_class() -> ClassDefinition {
    ClassBuilder::new("com.acme.Counter")
        .static_field("count")
        .entry_point(
            CodeBuilder::new(1)
                .push(Instruction::GetStatic { owner: "com.acme.Counter".into(), field: "count".to_string() })
                .push(Instruction::Load(0))
                .push(Instruction::Add)
                .push(Instruction::Dup)
                .push(Instruction::PutStatic { owner: "com.acme.Counter".into(), field: "count".to_string() })
                .push(Instruction::ReturnValue),
        )
        .build()
}

fn loader(classes: &[ClassDefinition]) -> SandboxClassLoader {
    SandboxClassLoader::new(Arc::new(standard_configuration()), vec![memory_source("test", classes)])
}

#[test]
fn test_load_is_idempotent_and_cached() {
    let loader = loader(&[counter_class()]);
    let name = ClassName::new("com.acme.Counter");

    let first = loader.load(&name).unwrap();
    let second = loader.load(&name).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "sandbox.com.acme.Counter");
    assert_eq!(first.original_name(), &name);
    assert_eq!(first.origin(), &ClassOrigin::Source("memory:test".to_string()));
    assert!(first.is_rewritten());
    assert!(loader.loaded_classes().contains(&name));
}

#[test]
fn test_rewritten_class_is_marked_and_renamed() {
    let loader = loader(&[counter_class()]);
    let class = loader.load(&"com.acme.Counter".into()).unwrap();
    let definition = class.definition();

    assert!(definition.interfaces.iter().any(|interface| interface == SANDBOXED_MARKER));
    assert_eq!(definition.super_name.as_ref().unwrap(), "java.lang.Object");
    assert_eq!(definition.attributes[attributes::ORIGIN], "memory:test");
    assert_eq!(definition.attributes[attributes::JUMP_THRESHOLD], "1000000");
    let code = class.method("apply", 1).unwrap().code.as_ref().unwrap();
    assert_eq!(code.instructions[0].referenced_class().unwrap(), "sandbox.com.acme.Counter");
}

#[test]
fn test_rewriting_is_deterministic_across_loaders() {
    let first = loader(&[counter_class()]).load(&"com.acme.Counter".into()).unwrap();
    let second = loader(&[counter_class()]).load(&"com.acme.Counter".into()).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.definition(), second.definition());
}

#[test]
fn test_pass_through_returns_host_class() {
    let configuration = standard_configuration();
    let host_object = configuration.analysis().host().host_class(&"java.lang.Object".into()).unwrap();
    let loader = SandboxClassLoader::new(Arc::new(configuration), Vec::new());

    let loaded = loader.load(&"java.lang.Object".into()).unwrap();
    assert!(Arc::ptr_eq(&loaded, &host_object));
    assert!(!loaded.is_rewritten());
    assert_eq!(loaded.origin(), &ClassOrigin::Host);
}

#[test]
fn test_bootstrap_classes_are_rewritten() {
    let loader = loader(&[]);
    let class = loader.load(&"java.lang.ArithmeticException".into()).unwrap();
    assert_eq!(class.name(), "sandbox.java.lang.ArithmeticException");
    assert_eq!(class.origin(), &ClassOrigin::Bootstrap);
    assert_eq!(class.super_name().unwrap(), "java.lang.RuntimeException");
    assert!(loader
        .is_assignable(class.name(), &"java.lang.Throwable".into())
        .unwrap());
    assert!(!loader
        .is_assignable(class.name(), &"java.lang.Error".into())
        .unwrap());
}

#[test]
fn test_unknown_class_names_the_class() {
    let loader = loader(&[]);
    let error = loader.load(&"com.acme.Missing".into()).unwrap_err();
    assert_eq!(error.class_name(), "com.acme.Missing");
    assert_eq!(error.stage(), LoadStage::Read);
    assert!(error.to_string().contains("com/acme/Missing.class"));
    assert!(error.to_string().contains("memory:test"));
}

#[test]
fn test_runtime_names_load_the_same_class() {
    let loader = loader(&[counter_class()]);
    let by_original = loader.load(&"com.acme.Counter".into()).unwrap();
    let by_runtime = loader.load_runtime(&"sandbox.com.acme.Counter".into()).unwrap();
    assert!(Arc::ptr_eq(&by_original, &by_runtime));
}

#[rstest]
#[case::reserved_namespace("sandbox.com.acme.Sneaky")]
#[case::sandboxed_host_class("sandbox.java.lang.Object")]
fn test_reserved_names_are_rejected(#[case] name: &str) {
    let loader = loader(&[]);
    assert!(matches!(loader.load(&name.into()), Err(ClassLoadingError::Rejected { .. })));
}

#[test]
fn test_forbidden_package_is_rejected() {
    let analysis = detbox::AnalysisConfiguration::builder()
        .host(detbox::test_utils::standard_host())
        .forbid_package("com.evil")
        .build()
        .unwrap();
    let loader = SandboxClassLoader::new(Arc::new(SandboxConfiguration::default_with(analysis)), Vec::new());
    let error = loader.load(&"com.evil.Payload".into()).unwrap_err();
    assert!(matches!(
        error,
        ClassLoadingError::Rejected { reason: RejectReason::Blacklisted(_), .. }
    ));
}

#[rstest]
#[case::wait("java.lang.Object", "wait", 0)]
#[case::clock("java.lang.System", "currentTimeMillis", 0)]
#[case::reflection("java.lang.reflect.Method", "invoke", 2)]
#[case::prefixed_clock("sandbox.java.lang.System", "currentTimeMillis", 0)]
#[case::prefixed_thread("sandbox.java.lang.Thread", "start", 0)]
fn test_disallowed_api_references_are_rejected(#[case] owner: &str, #[case] name: &str, #[case] arity: u8) {
    let mut code = CodeBuilder::new(1);
    for _ in 0..arity {
        code = code.push(Instruction::ConstNull);
    }
    let class = ClassBuilder::new("com.acme.Clock")
        .static_method("run", 0, false, code.invoke_static(owner, name, arity).push(Instruction::Return))
        .build();

    let loader = loader(&[class]);
    let error = loader.load(&"com.acme.Clock".into()).unwrap_err();
    assert_eq!(error.stage(), LoadStage::Rule("disallow-api-references".to_string()));
    let message = error.to_string();
    assert!(message.contains("Disallowed reference to API;"), "{message}");
    assert!(message.contains(&format!("{owner}.{name}({arity})")), "{message}");

    // rejection does not poison the cache: the same error on every attempt
    assert_eq!(loader.load(&"com.acme.Clock".into()).unwrap_err().to_string(), message);
}

#[test]
fn test_sandboxed_references_are_rejected() {
    let class = ClassBuilder::new("com.acme.Shortcut")
        .static_method(
            "run",
            0,
            false,
            CodeBuilder::new(1).invoke_static("sandbox.com.acme.Counter", "apply", 0).push(Instruction::Return),
        )
        .build();
    let loader = loader(&[class, counter_class()]);
    let error = loader.load(&"com.acme.Shortcut".into()).unwrap_err();
    assert_eq!(error.stage(), LoadStage::Rule("disallow-sandboxed-references".to_string()));
    assert!(error.to_string().contains("sandbox.com.acme.Counter"));
    assert!(!loader.loaded_classes().contains(&ClassName::new("com.acme.Counter")));
}

#[test]
fn test_reserved_instructions_are_rejected() {
    let class = ClassBuilder::new("com.acme.Forger")
        .entry_point(
            CodeBuilder::new(1)
                .push(Instruction::Sandbox(SandboxOp::Meter { cost: CostKind::Jump, amount: 0 }))
                .push(Instruction::Load(0))
                .push(Instruction::ReturnValue),
        )
        .build();
    let error = loader(&[class]).load(&"com.acme.Forger".into()).unwrap_err();
    assert_eq!(error.stage(), LoadStage::Rule("disallow-reserved-instructions".to_string()));
}

#[test]
fn test_declared_name_must_match() {
    let (_, bytes) = ClassBuilder::new("com.acme.Other").image();
    let source = ClassSource::memory("test", [(ClassName::new("com.acme.Declared"), bytes)]);
    let loader = SandboxClassLoader::new(Arc::new(standard_configuration()), vec![source]);
    assert!(matches!(
        loader.load(&"com.acme.Declared".into()),
        Err(ClassLoadingError::NameMismatch { .. })
    ));
}

#[test]
fn test_malformed_image_fails_at_decode() {
    let source = ClassSource::memory("test", [(ClassName::new("com.acme.Broken"), b"{".to_vec())]);
    let loader = SandboxClassLoader::new(Arc::new(standard_configuration()), vec![source]);
    let error = loader.load(&"com.acme.Broken".into()).unwrap_err();
    assert_eq!(error.stage(), LoadStage::Decode);
}

#[test]
fn test_directory_and_archive_sources() {
    let dir = tempfile::tempdir().unwrap();
    let classes = dir.path().join("classes");
    let entry = classes.join("com/acme/Counter.class");
    fs::create_dir_all(entry.parent().unwrap()).unwrap();
    fs::write(&entry, counter_class().encode().unwrap()).unwrap();

    let helper = ClassBuilder::new("com.acme.Helper").build();
    let archive = dir.path().join("helpers.json");
    ArchiveIndex::from_classes([&helper]).unwrap().write(&archive).unwrap();

    let loader = SandboxClassLoader::new(
        Arc::new(SandboxConfiguration::unlimited(standard_analysis())),
        vec![ClassSource::from_path(&classes), ClassSource::from_path(&archive)],
    );
    let counter = loader.load(&"com.acme.Counter".into()).unwrap();
    assert!(counter.origin().label().starts_with("directory:"));
    let helper = loader.load(&"com.acme.Helper".into()).unwrap();
    assert!(helper.origin().label().starts_with("archive:"));
    assert_eq!(helper.definition().attributes[attributes::JUMP_THRESHOLD], "unlimited");
}

#[test]
fn test_malformed_names_never_reach_sources() {
    let dir = tempfile::tempdir().unwrap();
    let classes = dir.path().join("classes");
    fs::create_dir_all(&classes).unwrap();
    let loader = SandboxClassLoader::new(Arc::new(standard_configuration()), vec![ClassSource::from_path(&classes)]);

    for name in [".tmp.x.Evil", "com..acme.Gap", "com/acme/Slash"] {
        let error = loader.load(&name.into()).unwrap_err();
        assert!(
            matches!(&error, ClassLoadingError::Rejected { reason: RejectReason::InvalidName, .. }),
            "{error}"
        );
        assert_eq!(error.stage(), LoadStage::Resolve);
    }
    assert!(loader.loaded_classes().is_empty());
}

#[test]
fn test_invalid_referenced_name_fails_at_decode() {
    let class = ClassBuilder::new("com.acme.Escaping")
        .static_method(
            "run",
            0,
            false,
            CodeBuilder::new(1).invoke_static(".tmp.x.Evil", "run", 0).push(Instruction::Return),
        )
        .build();
    let error = loader(&[class]).load(&"com.acme.Escaping".into()).unwrap_err();
    assert_eq!(error.stage(), LoadStage::Decode);
    assert!(matches!(error, ClassLoadingError::ClassFormat { .. }));
}

#[test]
fn test_profiles_instrument_independently() {
    let metered = loader(&[counter_class()]);
    let tight = SandboxClassLoader::new(
        Arc::new(standard_configuration().with_profile(ExecutionProfile::UNLIMITED.with_jumps(7))),
        vec![memory_source("test", [&counter_class()])],
    );

    let first = metered.load(&"com.acme.Counter".into()).unwrap();
    let second = tight.load(&"com.acme.Counter".into()).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.definition().attributes[attributes::JUMP_THRESHOLD], "1000000");
    assert_eq!(second.definition().attributes[attributes::JUMP_THRESHOLD], "7");

    // loading again through either loader keeps its own instrumentation
    let again = metered.load(&"com.acme.Counter".into()).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.definition().attributes[attributes::JUMP_THRESHOLD], "1000000");
}

#[test]
fn test_first_source_wins() {
    let first = ClassBuilder::new("com.acme.Shadowed").field("first").build();
    let second = ClassBuilder::new("com.acme.Shadowed").field("second").build();
    let loader = SandboxClassLoader::new(
        Arc::new(standard_configuration()),
        vec![memory_source("first", [&first]), memory_source("second", [&second])],
    );
    let class = loader.load(&"com.acme.Shadowed".into()).unwrap();
    assert!(class.has_field("first"));
    assert!(!class.has_field("second"));
}
