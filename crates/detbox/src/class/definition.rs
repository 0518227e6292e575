use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{ClassName, Instruction};

bitflags! {
    /// Access flags of a class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ClassAccess: u16 {
        /// Visible outside its package.
        const PUBLIC = 0x0001;
        /// May not be subclassed.
        const FINAL = 0x0010;
        /// Declares an interface.
        const INTERFACE = 0x0200;
        /// May not be instantiated.
        const ABSTRACT = 0x0400;
    }
}

bitflags! {
    /// Access flags of a field or method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MemberAccess: u16 {
        /// Visible everywhere.
        const PUBLIC = 0x0001;
        /// Visible inside the declaring class only.
        const PRIVATE = 0x0002;
        /// Visible to subclasses.
        const PROTECTED = 0x0004;
        /// Belongs to the class rather than to instances.
        const STATIC = 0x0008;
        /// May not be overridden or reassigned.
        const FINAL = 0x0010;
        /// Holds the receiver's monitor for the duration of the call.
        const SYNCHRONIZED = 0x0020;
        /// Implemented outside the class image.
        const NATIVE = 0x0100;
        /// Has no body.
        const ABSTRACT = 0x0400;
    }
}

/// An error raised when a class image cannot be decoded or is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassFormatError {
    /// The image is not a valid serialized class definition.
    #[error("malformed class image: {0}")]
    Malformed(String),
    /// The class name is not a valid dotted name.
    #[error("invalid class name '{0}'")]
    InvalidName(ClassName),
    /// A jump target points outside the method body.
    #[error("method {method} jumps to {target}, outside of its {len} instructions")]
    JumpOutOfRange {
        /// The offending method.
        method: String,
        /// The jump target.
        target: usize,
        /// The number of instructions in the method.
        len: usize,
    },
    /// An exception handler range or entry is outside the method body.
    #[error("method {method} declares an exception handler outside of its body")]
    HandlerOutOfRange {
        /// The offending method.
        method: String,
    },
    /// A method has a body although it is native or abstract, or lacks one although it is not.
    #[error("method {method} has an inconsistent body")]
    InconsistentBody {
        /// The offending method.
        method: String,
    },
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// The field name.
    pub name: String,
    /// The field access flags.
    #[serde(default)]
    pub access: MemberAccess,
}

/// An entry of a method's exception table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First covered instruction.
    pub start: usize,
    /// First instruction after the covered range.
    pub end: usize,
    /// The handler entry point.
    pub handler: usize,
    /// The throwable class caught, `None` for catch-all handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch_type: Option<ClassName>,
}

impl ExceptionHandler {
    /// Returns `true` if the handler covers the instruction at `pc`.
    pub const fn covers(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// The body of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Code {
    /// Number of local variable slots, arguments included.
    pub max_locals: u16,
    /// The instructions.
    pub instructions: Vec<Instruction>,
    /// The exception table, searched in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<ExceptionHandler>,
}

impl Code {
    /// Returns every index some instruction may jump to.
    pub fn jump_targets(&self) -> BTreeSet<usize> {
        self.instructions.iter().filter_map(Instruction::jump_target).collect()
    }

    fn validate(&self, method: &str) -> Result<(), ClassFormatError> {
        let len = self.instructions.len();
        for target in self.jump_targets() {
            if target >= len {
                return Err(ClassFormatError::JumpOutOfRange { method: method.to_string(), target, len })
            }
        }
        for handler in &self.handlers {
            if handler.start > handler.end || handler.end > len || handler.handler >= len {
                return Err(ClassFormatError::HandlerOutOfRange { method: method.to_string() })
            }
        }
        Ok(())
    }
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDefinition {
    /// The method name.
    pub name: String,
    /// Number of arguments, receiver excluded.
    pub arity: u8,
    /// Whether the method returns a value.
    #[serde(default)]
    pub returns_value: bool,
    /// The method access flags.
    #[serde(default)]
    pub access: MemberAccess,
    /// The body; `None` for native and abstract methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,
}

impl MethodDefinition {
    /// Returns `true` for static methods.
    pub const fn is_static(&self) -> bool {
        self.access.contains(MemberAccess::STATIC)
    }

    /// Returns `true` for native methods.
    pub const fn is_native(&self) -> bool {
        self.access.contains(MemberAccess::NATIVE)
    }

    /// Returns `true` for abstract methods.
    pub const fn is_abstract(&self) -> bool {
        self.access.contains(MemberAccess::ABSTRACT)
    }

    /// Renders the method as `name(arity)` for diagnostics.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.arity)
    }
}

/// A class: its identity, hierarchy, members and synthesized metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDefinition {
    /// The fully qualified class name.
    pub name: ClassName,
    /// The super class; `None` only for the root of the hierarchy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_name: Option<ClassName>,
    /// Implemented interfaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<ClassName>,
    /// The class access flags.
    #[serde(default)]
    pub access: ClassAccess,
    /// Declared fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDefinition>,
    /// Declared methods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MethodDefinition>,
    /// Synthesized metadata attached by definition providers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ClassDefinition {
    /// Creates an empty public class.
    pub fn new(name: impl Into<ClassName>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            interfaces: Vec::new(),
            access: ClassAccess::PUBLIC,
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Decodes and validates a class image.
    pub fn decode(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let definition: Self =
            serde_json::from_slice(bytes).map_err(|e| ClassFormatError::Malformed(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Encodes the class into an image.
    pub fn encode(&self) -> Result<Vec<u8>, ClassFormatError> {
        serde_json::to_vec(self).map_err(|e| ClassFormatError::Malformed(e.to_string()))
    }

    /// Checks the structural invariants every class image must satisfy.
    pub fn validate(&self) -> Result<(), ClassFormatError> {
        if !self.name.is_valid() {
            return Err(ClassFormatError::InvalidName(self.name.clone()))
        }
        if let Some(name) = self.referenced_classes().into_iter().find(|name| !name.is_valid()) {
            return Err(ClassFormatError::InvalidName(name))
        }
        for method in &self.methods {
            let bodiless = method.is_native() || method.is_abstract();
            match &method.code {
                Some(code) if !bodiless => code.validate(&method.signature())?,
                None if bodiless => {}
                _ => return Err(ClassFormatError::InconsistentBody { method: method.signature() }),
            }
        }
        Ok(())
    }

    /// Looks up a declared method by name and arity.
    pub fn method(&self, name: &str, arity: u8) -> Option<&MethodDefinition> {
        self.methods.iter().find(|method| method.name == name && method.arity == arity)
    }

    /// Returns `true` if the class declares a field with the given name.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name == name)
    }

    /// Returns every class name the definition mentions, its own name excluded.
    pub fn referenced_classes(&self) -> BTreeSet<ClassName> {
        let mut referenced: BTreeSet<ClassName> =
            self.super_name.iter().chain(&self.interfaces).cloned().collect();
        for code in self.methods.iter().filter_map(|method| method.code.as_ref()) {
            referenced.extend(code.instructions.iter().filter_map(Instruction::referenced_class).cloned());
            referenced.extend(code.handlers.iter().filter_map(|handler| handler.catch_type.clone()));
        }
        referenced.remove(&self.name);
        referenced
    }
}
