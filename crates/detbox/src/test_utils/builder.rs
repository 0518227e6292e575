//! Builders for assembling classes and method bodies.

use crate::{
    constants::naming::{CONSTRUCTOR, ENTRY_POINT},
    ClassDefinition, ClassName, ClassSource, Code, ExceptionHandler, FieldDefinition, Instruction,
    InvokeKind, MemberAccess, MethodDefinition,
};

/// A builder for assembling a method body.
#[derive(Debug, Clone, Default)]
pub struct CodeBuilder {
    code: Code,
}

impl CodeBuilder {
    /// Starts a body with `max_locals` local slots, arguments included.
    pub fn new(max_locals: u16) -> Self {
        Self { code: Code { max_locals, ..Default::default() } }
    }

    /// Build the body.
    pub fn build(self) -> Code {
        self.code
    }

    /// The index the next instruction will get.
    pub fn len(&self) -> usize {
        self.code.instructions.len()
    }

    /// Check if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.code.instructions.is_empty()
    }

    /// Append a single instruction.
    pub fn push(mut self, instruction: Instruction) -> Self {
        self.code.instructions.push(instruction);
        self
    }

    /// Append a series of instructions.
    pub fn append_many(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.code.instructions.extend(instructions);
        self
    }

    /// Append a static invocation.
    pub fn invoke_static(self, owner: &str, name: &str, arity: u8) -> Self {
        self.invoke(InvokeKind::Static, owner, name, arity)
    }

    /// Append a virtual invocation.
    pub fn invoke_virtual(self, owner: &str, name: &str, arity: u8) -> Self {
        self.invoke(InvokeKind::Virtual, owner, name, arity)
    }

    /// Append an exact invocation, as used for constructors.
    pub fn invoke_special(self, owner: &str, name: &str, arity: u8) -> Self {
        self.invoke(InvokeKind::Special, owner, name, arity)
    }

    /// Append `new owner; dup; <args>; invoke owner.<init>(args)`, leaving the instance on the
    /// stack.
    pub fn construct(self, owner: &str, args: impl IntoIterator<Item = Instruction>) -> Self {
        let args: Vec<_> = args.into_iter().collect();
        let arity = args.len() as u8;
        self.push(Instruction::New(owner.into()))
            .push(Instruction::Dup)
            .append_many(args)
            .invoke_special(owner, CONSTRUCTOR, arity)
    }

    /// Append an invocation.
    pub fn invoke(self, kind: InvokeKind, owner: &str, name: &str, arity: u8) -> Self {
        self.push(Instruction::Invoke { kind, owner: owner.into(), name: name.to_string(), arity })
    }

    /// Add an exception handler.
    pub fn handler(mut self, handler: ExceptionHandler) -> Self {
        self.code.handlers.push(handler);
        self
    }

    /// Add an exception handler for instructions `start..end` jumping to `handler`.
    pub fn catch(self, start: usize, end: usize, handler: usize, catch_type: Option<&str>) -> Self {
        self.handler(ExceptionHandler { start, end, handler, catch_type: catch_type.map(ClassName::from) })
    }
}

/// A builder for assembling a class.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    class: ClassDefinition,
}

impl ClassBuilder {
    /// Starts a public class extending `java.lang.Object`.
    pub fn new(name: &str) -> Self {
        let mut class = ClassDefinition::new(name);
        class.super_name = Some("java.lang.Object".into());
        Self { class }
    }

    /// Build the class.
    pub fn build(self) -> ClassDefinition {
        self.class
    }

    /// Build the class and encode its image.
    pub fn image(self) -> (ClassName, Vec<u8>) {
        let bytes = self.class.encode().expect("class definitions always encode");
        (self.class.name, bytes)
    }

    /// Set the super class.
    pub fn super_class(mut self, name: &str) -> Self {
        self.class.super_name = Some(name.into());
        self
    }

    /// Make the class the root of its hierarchy.
    pub fn no_super_class(mut self) -> Self {
        self.class.super_name = None;
        self
    }

    /// Add an implemented interface.
    pub fn interface(mut self, name: &str) -> Self {
        self.class.interfaces.push(name.into());
        self
    }

    /// Add an instance field.
    pub fn field(mut self, name: &str) -> Self {
        self.class.fields.push(FieldDefinition { name: name.to_string(), access: MemberAccess::PRIVATE });
        self
    }

    /// Add a static field.
    pub fn static_field(mut self, name: &str) -> Self {
        self.class.fields.push(FieldDefinition {
            name: name.to_string(),
            access: MemberAccess::PRIVATE | MemberAccess::STATIC,
        });
        self
    }

    /// Add a public static method.
    pub fn static_method(self, name: &str, arity: u8, returns_value: bool, code: CodeBuilder) -> Self {
        self.method_with_access(name, arity, returns_value, MemberAccess::PUBLIC | MemberAccess::STATIC, code)
    }

    /// Add a public instance method. Local 0 holds the receiver.
    pub fn method(self, name: &str, arity: u8, returns_value: bool, code: CodeBuilder) -> Self {
        self.method_with_access(name, arity, returns_value, MemberAccess::PUBLIC, code)
    }

    /// Add a method with explicit access flags.
    pub fn method_with_access(
        mut self,
        name: &str,
        arity: u8,
        returns_value: bool,
        access: MemberAccess,
        code: CodeBuilder,
    ) -> Self {
        self.class.methods.push(MethodDefinition {
            name: name.to_string(),
            arity,
            returns_value,
            access,
            code: Some(code.build()),
        });
        self
    }

    /// Add a method without body.
    pub fn native_method(mut self, name: &str, arity: u8, access: MemberAccess) -> Self {
        self.class.methods.push(MethodDefinition {
            name: name.to_string(),
            arity,
            returns_value: true,
            access: access | MemberAccess::NATIVE,
            code: None,
        });
        self
    }

    /// Add a no-argument constructor calling the super constructor.
    pub fn default_constructor(self) -> Self {
        let super_name = self.class.super_name.clone().unwrap_or_else(|| "java.lang.Object".into());
        let code = CodeBuilder::new(1)
            .push(Instruction::Load(0))
            .invoke_special(super_name.as_str(), CONSTRUCTOR, 0)
            .push(Instruction::Return);
        self.method(CONSTRUCTOR, 0, false, code)
    }

    /// Add the static `apply(input)` entry point run by the executor. Local 0 holds the input.
    pub fn entry_point(self, code: CodeBuilder) -> Self {
        self.static_method(ENTRY_POINT, 1, true, code)
    }
}

/// Creates an in-memory source holding `classes`.
pub fn memory_source<'a>(label: &str, classes: impl IntoIterator<Item = &'a ClassDefinition>) -> ClassSource {
    ClassSource::memory(
        label,
        classes
            .into_iter()
            .map(|class| (class.name.clone(), class.encode().expect("class definitions always encode"))),
    )
}
