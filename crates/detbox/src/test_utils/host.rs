//! A host environment modelled on the core library of a managed runtime.

use crate::{
    constants::naming::CONSTRUCTOR, AnalysisConfiguration, ClassDefinition, HostClasses, Instruction,
    SandboxConfiguration,
};

use super::{ClassBuilder, CodeBuilder};

/// The throwable field holding the message.
pub const MESSAGE_FIELD: &str = "message";

/// Host classes that are whitelisted and pass through unmodified.
pub const HOST_CLASSES: [&str; 6] = [
    "java.lang.Object",
    "java.lang.Throwable",
    "java.lang.Error",
    "java.lang.Exception",
    "java.lang.RuntimeException",
    "java.lang.String",
];

/// Bootstrap library classes rewritten into the sandbox namespace on first use, with their
/// super classes.
pub const BOOTSTRAP_CLASSES: [(&str, &str); 7] = [
    ("java.lang.ThreadDeath", "java.lang.Error"),
    ("java.lang.StackOverflowError", "java.lang.Error"),
    ("java.lang.OutOfMemoryError", "java.lang.Error"),
    ("java.lang.ArithmeticException", "java.lang.RuntimeException"),
    ("java.lang.NullPointerException", "java.lang.RuntimeException"),
    ("java.lang.IndexOutOfBoundsException", "java.lang.RuntimeException"),
    ("java.lang.NegativeArraySizeException", "java.lang.RuntimeException"),
];

fn object() -> ClassDefinition {
    ClassBuilder::new("java.lang.Object")
        .no_super_class()
        .method(CONSTRUCTOR, 0, false, CodeBuilder::new(1).push(Instruction::Return))
        .build()
}

fn throwable() -> ClassDefinition {
    ClassBuilder::new("java.lang.Throwable")
        .field(MESSAGE_FIELD)
        .default_constructor()
        .method(
            CONSTRUCTOR,
            1,
            false,
            CodeBuilder::new(2)
                .push(Instruction::Load(0))
                .push(Instruction::Load(1))
                .push(Instruction::PutField(MESSAGE_FIELD.to_string()))
                .push(Instruction::Return),
        )
        .method(
            "getMessage",
            0,
            true,
            CodeBuilder::new(1)
                .push(Instruction::Load(0))
                .push(Instruction::GetField(MESSAGE_FIELD.to_string()))
                .push(Instruction::ReturnValue),
        )
        .build()
}

/// Creates the standard host: [`HOST_CLASSES`] as host classes and [`BOOTSTRAP_CLASSES`] as
/// bootstrap library images.
///
/// Constructors are declared on `Object` and `Throwable` only; subclasses inherit them.
pub fn standard_host() -> HostClasses {
    let mut host = HostClasses::empty().with_class(object()).with_class(throwable());
    for (name, super_name) in [
        ("java.lang.Error", "java.lang.Throwable"),
        ("java.lang.Exception", "java.lang.Throwable"),
        ("java.lang.RuntimeException", "java.lang.Exception"),
        ("java.lang.String", "java.lang.Object"),
    ] {
        host.insert_class(ClassBuilder::new(name).super_class(super_name).build());
    }
    for (name, super_name) in BOOTSTRAP_CLASSES {
        let (name, bytes) = ClassBuilder::new(name).super_class(super_name).image();
        host.insert_bootstrap_bytes(name, bytes);
    }
    host
}

/// An analysis configuration with the minimal whitelist over the [`standard_host`].
pub fn standard_analysis() -> AnalysisConfiguration {
    AnalysisConfiguration::builder()
        .host(standard_host())
        .build()
        .expect("the standard analysis configuration is valid")
}

/// The default rewriting policy with the `DEFAULT` profile over the [`standard_host`].
pub fn standard_configuration() -> SandboxConfiguration {
    SandboxConfiguration::default_with(standard_analysis())
}
