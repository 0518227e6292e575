use std::collections::BTreeSet;

use crate::{
    constants::costing::{ARRAY_ELEMENT_COST, OBJECT_ALLOCATION_COST},
    edit_methods, ClassDefinition, ClassName, CostKind, Emitter, EmitterContext, Instruction, MemberAccess,
    PassError, SandboxOp,
};

fn meter(cost: CostKind, amount: u64) -> Instruction {
    Instruction::Sandbox(SandboxOp::Meter { cost, amount })
}

/// Removes monitors: sandboxed code runs on a single thread, and a blocked monitor would make
/// execution depend on the host scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripSynchronization;

impl Emitter for StripSynchronization {
    fn name(&self) -> &'static str {
        "strip-synchronization"
    }

    fn emit(&self, _context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        for method in &mut class.methods {
            method.access.remove(MemberAccess::SYNCHRONIZED);
        }
        edit_methods(class, |_, editor| {
            let monitors: Vec<usize> = editor
                .instructions()
                .iter()
                .enumerate()
                .filter(|(_, instruction)| {
                    matches!(instruction, Instruction::MonitorEnter | Instruction::MonitorExit)
                })
                .map(|(position, _)| position)
                .collect();
            // both monitor instructions pop the object they lock
            for position in monitors {
                editor.replace(position, Instruction::Pop);
            }
        });
        Ok(())
    }
}

/// Charges the allocation counter before every object and array allocation.
#[derive(Debug, Clone, Copy)]
pub struct TraceAllocations {
    /// Allocation units charged per object.
    pub object_cost: u64,
    /// Allocation units charged per array element.
    pub element_cost: u64,
}

impl Default for TraceAllocations {
    fn default() -> Self {
        Self { object_cost: OBJECT_ALLOCATION_COST, element_cost: ARRAY_ELEMENT_COST }
    }
}

impl Emitter for TraceAllocations {
    fn name(&self) -> &'static str {
        "trace-allocations"
    }

    fn emit(&self, _context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        edit_methods(class, |_, editor| {
            let sites: Vec<(usize, Instruction)> = editor
                .instructions()
                .iter()
                .enumerate()
                .filter_map(|(position, instruction)| match instruction {
                    Instruction::New(_) => Some((position, meter(CostKind::Allocation, self.object_cost))),
                    Instruction::NewArray => Some((
                        position,
                        Instruction::Sandbox(SandboxOp::MeterArrayAllocation {
                            element_size: self.element_cost,
                        }),
                    )),
                    _ => None,
                })
                .collect();
            for (position, instrumentation) in sites {
                editor.insert_before(position, [instrumentation]);
            }
        });
        Ok(())
    }
}

/// Charges the invocation counter before every method invocation site.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceInvocations;

impl Emitter for TraceInvocations {
    fn name(&self) -> &'static str {
        "trace-invocations"
    }

    fn emit(&self, _context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        instrument_each(class, |instruction| matches!(instruction, Instruction::Invoke { .. }), CostKind::Invocation);
        Ok(())
    }
}

/// Charges the jump counter before every branch, taken or not. Back-edges of loops are
/// branches, so every loop iteration is charged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceJumps;

impl Emitter for TraceJumps {
    fn name(&self) -> &'static str {
        "trace-jumps"
    }

    fn emit(&self, _context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        instrument_each(class, Instruction::is_jump, CostKind::Jump);
        Ok(())
    }
}

/// Charges the throw counter before every explicit throw.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceThrows;

impl Emitter for TraceThrows {
    fn name(&self) -> &'static str {
        "trace-throws"
    }

    fn emit(&self, _context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        instrument_each(class, |instruction| matches!(instruction, Instruction::Throw), CostKind::Throw);
        Ok(())
    }
}

fn instrument_each(class: &mut ClassDefinition, site: impl Fn(&Instruction) -> bool, cost: CostKind) {
    edit_methods(class, |_, editor| {
        let sites: Vec<usize> = editor
            .instructions()
            .iter()
            .enumerate()
            .filter(|(_, instruction)| site(instruction))
            .map(|(position, _)| position)
            .collect();
        for position in sites {
            editor.insert_before(position, [meter(cost, 1)]);
        }
    });
}

/// Inserts a catch check at every exception handler entry, so a handler can never swallow an
/// uncatchable throwable.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardExceptionHandlers;

impl Emitter for GuardExceptionHandlers {
    fn name(&self) -> &'static str {
        "guard-exception-handlers"
    }

    fn emit(&self, _context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        edit_methods(class, |_, editor| {
            let entries: BTreeSet<usize> = editor.handlers().iter().map(|handler| handler.handler).collect();
            for entry in entries {
                editor.insert_before(entry, [Instruction::Sandbox(SandboxOp::CheckCatch)]);
            }
        });
        Ok(())
    }
}

/// Renames every class reference into the sandbox namespace. Pass-through names are kept.
///
/// Must run after every other emitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteTypeReferences;

impl Emitter for RewriteTypeReferences {
    fn name(&self) -> &'static str {
        "rewrite-type-references"
    }

    fn emit(&self, context: &EmitterContext<'_>, class: &mut ClassDefinition) -> Result<(), PassError> {
        let resolve = |name: &mut ClassName| *name = context.resolve(name);

        class.super_name.iter_mut().for_each(resolve);
        class.interfaces.iter_mut().for_each(resolve);
        for code in class.methods.iter_mut().filter_map(|method| method.code.as_mut()) {
            code.instructions.iter_mut().filter_map(Instruction::referenced_class_mut).for_each(resolve);
            code.handlers.iter_mut().filter_map(|handler| handler.catch_type.as_mut()).for_each(resolve);
        }
        Ok(())
    }
}
