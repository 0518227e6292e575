use serde::{Deserialize, Serialize};

use crate::{ClassName, CostKind};

/// How an [`Instruction::Invoke`] selects the method it calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    /// Calls a static method of the owner class.
    Static,
    /// Dispatches on the runtime class of the receiver, which is popped after the arguments.
    Virtual,
    /// Calls the owner's method exactly (constructors and `super` calls) on the receiver.
    Special,
}

/// One instruction of the sandbox stack machine.
///
/// Jump targets are indices into the method's instruction list. Integer values are `i64`;
/// conditional jumps pop their operands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    /// Pushes an integer constant.
    Const(i64),
    /// Pushes a string constant.
    ConstStr(String),
    /// Pushes `null`.
    ConstNull,
    /// Pushes the value of a local variable.
    Load(u16),
    /// Pops a value into a local variable.
    Store(u16),
    /// Duplicates the top of the stack.
    Dup,
    /// Discards the top of the stack.
    Pop,
    /// Swaps the two topmost values.
    Swap,
    /// Integer addition.
    Add,
    /// Integer subtraction.
    Sub,
    /// Integer multiplication.
    Mul,
    /// Integer division; division by zero throws `java.lang.ArithmeticException`.
    Div,
    /// Integer remainder.
    Rem,
    /// Integer negation.
    Neg,
    /// Unconditional jump.
    Goto(usize),
    /// Jumps if the popped integer is zero.
    IfZero(usize),
    /// Jumps if the popped integer is not zero.
    IfNonZero(usize),
    /// Pops `b` then `a` and jumps if `a < b`.
    IfLt(usize),
    /// Pops two values and jumps if they are equal.
    IfEq(usize),
    /// Jumps if the popped reference is `null`.
    IfNull(usize),
    /// Allocates an uninitialized instance of a class.
    New(ClassName),
    /// Pops a length and allocates an array of `null`s.
    NewArray,
    /// Pops an array and pushes its length.
    ArrayLength,
    /// Pops an index and an array, pushes the element.
    ArrayLoad,
    /// Pops a value, an index and an array, stores the element.
    ArrayStore,
    /// Pops an object and pushes one of its fields.
    GetField(String),
    /// Pops a value and an object and stores the field.
    PutField(String),
    /// Pushes a static field of a class.
    GetStatic {
        /// The class declaring the field.
        owner: ClassName,
        /// The field name.
        field: String,
    },
    /// Pops a value into a static field of a class.
    PutStatic {
        /// The class declaring the field.
        owner: ClassName,
        /// The field name.
        field: String,
    },
    /// Calls a method.
    Invoke {
        /// The dispatch kind.
        kind: InvokeKind,
        /// The class the method is resolved against.
        owner: ClassName,
        /// The method name.
        name: String,
        /// The number of arguments, receiver excluded.
        arity: u8,
    },
    /// Pops a reference and pushes `1` if it is an instance of the class, `0` otherwise.
    InstanceOf(ClassName),
    /// Pops an object and acquires its monitor.
    MonitorEnter,
    /// Pops an object and releases its monitor.
    MonitorExit,
    /// Pops a throwable and throws it.
    Throw,
    /// Returns from a method without a value.
    Return,
    /// Pops a value and returns it.
    ReturnValue,
    /// Engine instrumentation. Only the rewriting pipeline may emit these.
    Sandbox(SandboxOp),
}

/// Instrumentation inserted by emitters. Host runtimes execute these by calling back into the
/// [`SandboxRuntimeContext`](crate::SandboxRuntimeContext) they run under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxOp {
    /// Charges a fixed amount to a cost counter.
    Meter {
        /// The counter to charge.
        cost: CostKind,
        /// The amount to charge.
        amount: u64,
    },
    /// Charges the allocation counter for the array whose length is on top of the stack,
    /// without popping it.
    MeterArrayAllocation {
        /// The cost of a single element.
        element_size: u64,
    },
    /// Placed at every exception handler entry. Inspects the caught throwable on top of the
    /// stack without popping it and raises the fatal signal if it may not be caught.
    CheckCatch,
}

impl Instruction {
    /// Returns the jump target of a branching instruction.
    pub const fn jump_target(&self) -> Option<usize> {
        match self {
            Self::Goto(target) |
            Self::IfZero(target) |
            Self::IfNonZero(target) |
            Self::IfLt(target) |
            Self::IfEq(target) |
            Self::IfNull(target) => Some(*target),
            _ => None,
        }
    }

    /// Returns a mutable reference to the jump target of a branching instruction.
    pub fn jump_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Self::Goto(target) |
            Self::IfZero(target) |
            Self::IfNonZero(target) |
            Self::IfLt(target) |
            Self::IfEq(target) |
            Self::IfNull(target) => Some(target),
            _ => None,
        }
    }

    /// Returns `true` for branching instructions.
    pub const fn is_jump(&self) -> bool {
        self.jump_target().is_some()
    }

    /// Returns `true` if control never falls through to the next instruction.
    pub const fn ends_block(&self) -> bool {
        matches!(self, Self::Goto(_) | Self::Throw | Self::Return | Self::ReturnValue)
    }

    /// Returns the class this instruction refers to, if any.
    pub const fn referenced_class(&self) -> Option<&ClassName> {
        match self {
            Self::New(class) |
            Self::InstanceOf(class) |
            Self::GetStatic { owner: class, .. } |
            Self::PutStatic { owner: class, .. } |
            Self::Invoke { owner: class, .. } => Some(class),
            _ => None,
        }
    }

    /// Returns a mutable reference to the class this instruction refers to, if any.
    pub fn referenced_class_mut(&mut self) -> Option<&mut ClassName> {
        match self {
            Self::New(class) |
            Self::InstanceOf(class) |
            Self::GetStatic { owner: class, .. } |
            Self::PutStatic { owner: class, .. } |
            Self::Invoke { owner: class, .. } => Some(class),
            _ => None,
        }
    }
}
