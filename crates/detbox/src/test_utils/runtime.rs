//! A reference [`HostRuntime`]: a small stack interpreter for rewritten classes.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Serialize;

use crate::{
    constants::naming::{ENTRY_POINT, STATIC_INITIALIZER},
    ClassLoadingError, ClassName, Code, ExecutionFault, FatalSignal, HostRuntime, Instruction,
    InvokeKind, LoadedClass, SandboxOp, SandboxRuntimeContext, ThresholdViolation,
};

use super::MESSAGE_FIELD;

/// The call depth at which [`ReferenceRuntime`] throws `java.lang.StackOverflowError`.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// A value of the reference runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// The null reference.
    Null,
    /// An integer.
    Int(i64),
    /// A string.
    Str(String),
    /// A heap object, identified by its allocation index.
    Ref {
        /// The allocation index.
        object: usize,
    },
}

impl Value {
    /// Returns the integer, if the value is one.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Interprets the static `apply(input)` method of an entry class.
///
/// Sandbox instrumentation is executed by calling back into the [`SandboxRuntimeContext`].
/// Exception handlers only ever see throwables; fatal signals and load failures unwind every
/// frame. Statics are initialized once per run.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceRuntime {
    max_depth: usize,
}

impl ReferenceRuntime {
    /// Creates a runtime with a custom maximum call depth.
    pub const fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Default for ReferenceRuntime {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl HostRuntime for ReferenceRuntime {
    type Input = Value;
    type Output = Value;

    fn run(
        &self,
        context: &SandboxRuntimeContext,
        entry: &Arc<LoadedClass>,
        input: Value,
    ) -> Result<Value, ExecutionFault> {
        let mut machine = Machine {
            context,
            heap: Vec::new(),
            statics: BTreeMap::new(),
            initialized: BTreeSet::new(),
            depth: 0,
            max_depth: self.max_depth,
        };
        let result = machine.initialize(entry).and_then(|()| {
            let index = entry
                .definition()
                .methods
                .iter()
                .position(|method| method.name == ENTRY_POINT && method.arity == 1 && method.is_static())
                .ok_or_else(|| linkage(entry, format!("missing static entry point {ENTRY_POINT}(1)")))?;
            machine.invoke(entry, index, vec![input])
        });
        match result {
            Ok(value) => Ok(value.unwrap_or(Value::Null)),
            Err(Unwind::Throw(object)) => {
                let class = machine.class_of(object).name().clone();
                Err(ExecutionFault::Thrown { class, message: machine.message_of(object) })
            }
            Err(Unwind::Fault(fault)) => Err(fault),
        }
    }
}

#[derive(Debug)]
enum HeapObject {
    Instance { class: Arc<LoadedClass>, fields: BTreeMap<String, Value> },
    Array(Vec<Value>),
}

/// Why a frame stopped early.
#[derive(Debug)]
enum Unwind {
    /// A throwable on the heap, offered to exception handlers.
    Throw(usize),
    /// Never offered to exception handlers.
    Fault(ExecutionFault),
}

impl From<ExecutionFault> for Unwind {
    fn from(fault: ExecutionFault) -> Self {
        Self::Fault(fault)
    }
}

impl From<ClassLoadingError> for Unwind {
    fn from(error: ClassLoadingError) -> Self {
        Self::Fault(error.into())
    }
}

impl From<FatalSignal> for Unwind {
    fn from(signal: FatalSignal) -> Self {
        Self::Fault(signal.into())
    }
}

impl From<ThresholdViolation> for Unwind {
    fn from(violation: ThresholdViolation) -> Self {
        Self::Fault(violation.into())
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(Option<Value>),
}

fn linkage(class: &LoadedClass, message: impl Into<String>) -> Unwind {
    Unwind::Fault(ExecutionFault::Linkage { class: class.name().clone(), message: message.into() })
}

fn pop(class: &LoadedClass, stack: &mut Vec<Value>) -> Result<Value, Unwind> {
    stack.pop().ok_or_else(|| linkage(class, "operand stack underflow"))
}

fn pop_int(class: &LoadedClass, stack: &mut Vec<Value>) -> Result<i64, Unwind> {
    match pop(class, stack)? {
        Value::Int(value) => Ok(value),
        other => Err(linkage(class, format!("expected an integer, found {other:?}"))),
    }
}

/// Pops a reference, `None` for null.
fn pop_ref(class: &LoadedClass, stack: &mut Vec<Value>) -> Result<Option<usize>, Unwind> {
    match pop(class, stack)? {
        Value::Null => Ok(None),
        Value::Ref { object } => Ok(Some(object)),
        other => Err(linkage(class, format!("expected a reference, found {other:?}"))),
    }
}

struct Machine<'a> {
    context: &'a SandboxRuntimeContext,
    heap: Vec<HeapObject>,
    statics: BTreeMap<(ClassName, String), Value>,
    initialized: BTreeSet<ClassName>,
    depth: usize,
    max_depth: usize,
}

impl Machine<'_> {
    fn load(&self, name: &ClassName) -> Result<Arc<LoadedClass>, Unwind> {
        Ok(self.context.class_loader().load_runtime(name)?)
    }

    fn initialize(&mut self, class: &Arc<LoadedClass>) -> Result<(), Unwind> {
        if !self.initialized.insert(class.name().clone()) {
            return Ok(())
        }
        if let Some(index) = class
            .definition()
            .methods
            .iter()
            .position(|method| method.name == STATIC_INITIALIZER && method.arity == 0)
        {
            self.invoke(class, index, Vec::new())?;
        }
        Ok(())
    }

    fn allocate(&mut self, object: HeapObject) -> usize {
        self.heap.push(object);
        self.heap.len() - 1
    }

    fn class_of(&self, object: usize) -> &Arc<LoadedClass> {
        match &self.heap[object] {
            HeapObject::Instance { class, .. } => class,
            HeapObject::Array(_) => unreachable!("only instances are thrown"),
        }
    }

    fn message_of(&self, object: usize) -> String {
        match &self.heap[object] {
            HeapObject::Instance { fields, .. } => match fields.get(MESSAGE_FIELD) {
                Some(Value::Str(message)) => message.clone(),
                _ => String::new(),
            },
            HeapObject::Array(_) => String::new(),
        }
    }

    /// Creates a throwable of a library class, named by its original name.
    fn throwable(&mut self, name: &str, message: impl Into<String>) -> Unwind {
        match self.context.class_loader().load(&ClassName::new(name)) {
            Ok(class) => {
                let fields = BTreeMap::from([(MESSAGE_FIELD.to_string(), Value::Str(message.into()))]);
                Unwind::Throw(self.allocate(HeapObject::Instance { class, fields }))
            }
            Err(error) => error.into(),
        }
    }

    fn null_pointer(&mut self, what: &str) -> Unwind {
        self.throwable("java.lang.NullPointerException", format!("{what} on null"))
    }

    /// Finds a method by walking the super chain from `start`.
    fn find_method(
        &self,
        start: Arc<LoadedClass>,
        name: &str,
        arity: u8,
    ) -> Result<Option<(Arc<LoadedClass>, usize)>, Unwind> {
        let mut visited = BTreeSet::new();
        let mut current = Some(start);
        while let Some(class) = current.take() {
            if !visited.insert(class.name().clone()) {
                break
            }
            if let Some(index) =
                class.definition().methods.iter().position(|method| method.name == name && method.arity == arity)
            {
                return Ok(Some((class, index)))
            }
            current = class.super_name().map(|parent| self.load(parent)).transpose()?;
        }
        Ok(None)
    }

    fn invoke(&mut self, class: &Arc<LoadedClass>, index: usize, args: Vec<Value>) -> Result<Option<Value>, Unwind> {
        let method = &class.definition().methods[index];
        let Some(code) = method.code.as_ref() else {
            return Err(linkage(class, format!("{} has no body to interpret", method.signature())))
        };
        if self.depth >= self.max_depth {
            return Err(self.throwable("java.lang.StackOverflowError", ""))
        }

        self.depth += 1;
        let result = self.execute(class, code, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, class: &Arc<LoadedClass>, code: &Code, mut locals: Vec<Value>) -> Result<Option<Value>, Unwind> {
        if locals.len() < code.max_locals as usize {
            locals.resize(code.max_locals as usize, Value::Null);
        }
        let mut stack = Vec::new();
        let mut pc = 0;
        loop {
            let Some(instruction) = code.instructions.get(pc) else {
                return Err(linkage(class, "execution fell off the end of a method"))
            };
            match self.step(class, instruction, &mut stack, &mut locals) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(target)) => pc = target,
                Ok(Flow::Return(value)) => return Ok(value),
                Err(Unwind::Throw(object)) => match self.find_handler(code, pc, object)? {
                    Some(handler) => {
                        stack.clear();
                        stack.push(Value::Ref { object });
                        pc = handler;
                    }
                    None => return Err(Unwind::Throw(object)),
                },
                Err(fault) => return Err(fault),
            }
        }
    }

    fn find_handler(&self, code: &Code, pc: usize, object: usize) -> Result<Option<usize>, Unwind> {
        let thrown = self.class_of(object).name();
        for handler in code.handlers.iter().filter(|handler| handler.covers(pc)) {
            let catches = match &handler.catch_type {
                None => true,
                Some(catch_type) => self.context.class_loader().is_assignable(thrown, catch_type)?,
            };
            if catches {
                return Ok(Some(handler.handler))
            }
        }
        Ok(None)
    }

    fn step(
        &mut self,
        class: &Arc<LoadedClass>,
        instruction: &Instruction,
        stack: &mut Vec<Value>,
        locals: &mut [Value],
    ) -> Result<Flow, Unwind> {
        match instruction {
            Instruction::Const(value) => stack.push(Value::Int(*value)),
            Instruction::ConstStr(value) => stack.push(Value::Str(value.clone())),
            Instruction::ConstNull => stack.push(Value::Null),
            Instruction::Load(slot) => {
                let value =
                    locals.get(*slot as usize).cloned().ok_or_else(|| linkage(class, format!("no local {slot}")))?;
                stack.push(value);
            }
            Instruction::Store(slot) => {
                let value = pop(class, stack)?;
                *locals.get_mut(*slot as usize).ok_or_else(|| linkage(class, format!("no local {slot}")))? = value;
            }
            Instruction::Dup => {
                let value = stack.last().cloned().ok_or_else(|| linkage(class, "operand stack underflow"))?;
                stack.push(value);
            }
            Instruction::Pop => {
                pop(class, stack)?;
            }
            Instruction::Swap => {
                let b = pop(class, stack)?;
                let a = pop(class, stack)?;
                stack.push(b);
                stack.push(a);
            }
            Instruction::Add | Instruction::Sub | Instruction::Mul | Instruction::Div | Instruction::Rem => {
                let b = pop_int(class, stack)?;
                let a = pop_int(class, stack)?;
                let value = match instruction {
                    Instruction::Add => a.wrapping_add(b),
                    Instruction::Sub => a.wrapping_sub(b),
                    Instruction::Mul => a.wrapping_mul(b),
                    _ if b == 0 => return Err(self.throwable("java.lang.ArithmeticException", "/ by zero")),
                    Instruction::Div => a.wrapping_div(b),
                    _ => a.wrapping_rem(b),
                };
                stack.push(Value::Int(value));
            }
            Instruction::Neg => {
                let value = pop_int(class, stack)?;
                stack.push(Value::Int(value.wrapping_neg()));
            }
            Instruction::Goto(target) => return Ok(Flow::Jump(*target)),
            Instruction::IfZero(target) => return Ok(branch(pop_int(class, stack)? == 0, *target)),
            Instruction::IfNonZero(target) => return Ok(branch(pop_int(class, stack)? != 0, *target)),
            Instruction::IfLt(target) => {
                let b = pop_int(class, stack)?;
                let a = pop_int(class, stack)?;
                return Ok(branch(a < b, *target))
            }
            Instruction::IfEq(target) => {
                let b = pop(class, stack)?;
                let a = pop(class, stack)?;
                return Ok(branch(a == b, *target))
            }
            Instruction::IfNull(target) => return Ok(branch(pop(class, stack)? == Value::Null, *target)),
            Instruction::New(name) => {
                let target = self.load(name)?;
                self.initialize(&target)?;
                let object = self.allocate(HeapObject::Instance { class: target, fields: BTreeMap::new() });
                stack.push(Value::Ref { object });
            }
            Instruction::NewArray => {
                let len = pop_int(class, stack)?;
                let Ok(len) = usize::try_from(len) else {
                    return Err(self.throwable("java.lang.NegativeArraySizeException", len.to_string()))
                };
                let object = self.allocate(HeapObject::Array(vec![Value::Null; len]));
                stack.push(Value::Ref { object });
            }
            Instruction::ArrayLength => {
                let array = self.pop_array(class, stack)?;
                let len = match &self.heap[array] {
                    HeapObject::Array(elements) => elements.len(),
                    HeapObject::Instance { .. } => unreachable!("checked by pop_array"),
                };
                stack.push(Value::Int(len as i64));
            }
            Instruction::ArrayLoad => {
                let index = pop_int(class, stack)?;
                let array = self.pop_array(class, stack)?;
                let slot = self.array_slot(array, index)?;
                stack.push(slot.clone());
            }
            Instruction::ArrayStore => {
                let value = pop(class, stack)?;
                let index = pop_int(class, stack)?;
                let array = self.pop_array(class, stack)?;
                *self.array_slot(array, index)? = value;
            }
            Instruction::GetField(field) => {
                let object = self.pop_instance(class, stack, "field read")?;
                let value = self.fields(object).get(field).cloned().unwrap_or(Value::Null);
                stack.push(value);
            }
            Instruction::PutField(field) => {
                let value = pop(class, stack)?;
                let object = self.pop_instance(class, stack, "field write")?;
                self.fields(object).insert(field.clone(), value);
            }
            Instruction::GetStatic { owner, field } => {
                let owner = self.load(owner)?;
                self.initialize(&owner)?;
                let value =
                    self.statics.get(&(owner.name().clone(), field.clone())).cloned().unwrap_or(Value::Null);
                stack.push(value);
            }
            Instruction::PutStatic { owner, field } => {
                let value = pop(class, stack)?;
                let owner = self.load(owner)?;
                self.initialize(&owner)?;
                self.statics.insert((owner.name().clone(), field.clone()), value);
            }
            Instruction::Invoke { kind, owner, name, arity } => {
                let at = stack
                    .len()
                    .checked_sub(*arity as usize)
                    .ok_or_else(|| linkage(class, "operand stack underflow"))?;
                let mut args = stack.split_off(at);
                let start = match kind {
                    InvokeKind::Static => {
                        let target = self.load(owner)?;
                        self.initialize(&target)?;
                        target
                    }
                    InvokeKind::Virtual | InvokeKind::Special => {
                        let Some(receiver) = pop_ref(class, stack)? else {
                            return Err(self.null_pointer(&format!("invocation of {name}")))
                        };
                        args.insert(0, Value::Ref { object: receiver });
                        match (kind, &self.heap[receiver]) {
                            (InvokeKind::Virtual, HeapObject::Instance { class: runtime, .. }) => runtime.clone(),
                            _ => self.load(owner)?,
                        }
                    }
                };
                let Some((target, index)) = self.find_method(start, name, *arity)? else {
                    return Err(linkage(class, format!("no method {owner}.{name}({arity})")))
                };
                let method = &target.definition().methods[index];
                if method.is_static() != matches!(kind, InvokeKind::Static) {
                    return Err(linkage(class, format!("{owner}.{} has the wrong dispatch kind", method.signature())))
                }
                let returns_value = method.returns_value;
                let result = self.invoke(&target, index, args)?;
                if returns_value {
                    stack.push(result.unwrap_or(Value::Null));
                }
            }
            Instruction::InstanceOf(target) => {
                let value = match pop_ref(class, stack)? {
                    Some(object) => match &self.heap[object] {
                        HeapObject::Instance { class: instance, .. } => {
                            let instance = instance.name().clone();
                            self.context.class_loader().is_assignable(&instance, target)?
                        }
                        HeapObject::Array(_) => false,
                    },
                    None => false,
                };
                stack.push(Value::Int(value.into()));
            }
            Instruction::MonitorEnter | Instruction::MonitorExit => {
                pop(class, stack)?;
            }
            Instruction::Throw => {
                return Err(Unwind::Throw(self.pop_instance(class, stack, "throw")?))
            }
            Instruction::Return => return Ok(Flow::Return(None)),
            Instruction::ReturnValue => return Ok(Flow::Return(Some(pop(class, stack)?))),
            Instruction::Sandbox(op) => self.sandbox(class, op, stack)?,
        }
        Ok(Flow::Next)
    }

    fn sandbox(&self, class: &LoadedClass, op: &SandboxOp, stack: &[Value]) -> Result<(), Unwind> {
        let costs = self.context.runtime_costs();
        match op {
            SandboxOp::Meter { cost, amount } => costs.record(*cost, *amount)?,
            SandboxOp::MeterArrayAllocation { element_size } => match stack.last() {
                Some(Value::Int(len)) => {
                    costs.record_array_allocation(u64::try_from(*len).unwrap_or_default(), *element_size)?
                }
                _ => return Err(linkage(class, "array length expected on top of the stack")),
            },
            SandboxOp::CheckCatch => match stack.last() {
                Some(Value::Ref { object }) if matches!(self.heap[*object], HeapObject::Instance { .. }) => {
                    let thrown = self.class_of(*object).name().clone();
                    self.context.check_catch(&thrown, &self.message_of(*object))?;
                }
                _ => return Err(linkage(class, "throwable expected at handler entry")),
            },
        }
        Ok(())
    }

    fn pop_array(&mut self, class: &LoadedClass, stack: &mut Vec<Value>) -> Result<usize, Unwind> {
        match pop_ref(class, stack)? {
            Some(object) if matches!(self.heap[object], HeapObject::Array(_)) => Ok(object),
            Some(_) => Err(linkage(class, "expected an array")),
            None => Err(self.null_pointer("array access")),
        }
    }

    fn pop_instance(&mut self, class: &LoadedClass, stack: &mut Vec<Value>, what: &str) -> Result<usize, Unwind> {
        match pop_ref(class, stack)? {
            Some(object) if matches!(self.heap[object], HeapObject::Instance { .. }) => Ok(object),
            Some(_) => Err(linkage(class, "expected an object instance")),
            None => Err(self.null_pointer(what)),
        }
    }

    fn fields(&mut self, object: usize) -> &mut BTreeMap<String, Value> {
        match &mut self.heap[object] {
            HeapObject::Instance { fields, .. } => fields,
            HeapObject::Array(_) => unreachable!("checked by pop_instance"),
        }
    }

    fn array_slot(&mut self, array: usize, index: i64) -> Result<&mut Value, Unwind> {
        let len = match &self.heap[array] {
            HeapObject::Array(elements) => elements.len(),
            HeapObject::Instance { .. } => unreachable!("checked by pop_array"),
        };
        let Some(slot) = usize::try_from(index).ok().filter(|index| *index < len) else {
            return Err(self.throwable(
                "java.lang.IndexOutOfBoundsException",
                format!("Index {index} out of bounds for length {len}"),
            ))
        };
        match &mut self.heap[array] {
            HeapObject::Array(elements) => Ok(&mut elements[slot]),
            HeapObject::Instance { .. } => unreachable!("checked by pop_array"),
        }
    }
}

const fn branch(taken: bool, target: usize) -> Flow {
    if taken {
        Flow::Jump(target)
    } else {
        Flow::Next
    }
}
