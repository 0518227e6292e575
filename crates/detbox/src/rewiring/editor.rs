use core::mem;
use std::collections::BTreeMap;

use crate::{Code, Instruction};

/// Edits a method body while keeping its control flow intact.
///
/// Instructions are inserted *before* positions of the original body. When the edit is
/// finished, every jump target and exception handler boundary that pointed at an original
/// instruction is moved to the first instruction inserted before it, so that inserted
/// instrumentation runs whenever control reaches the original instruction.
///
/// Positions always refer to the original body, no matter how many edits came before.
#[derive(Debug)]
pub struct CodeEditor<'a> {
    code: &'a mut Code,
    insertions: BTreeMap<usize, Vec<Instruction>>,
    replacements: BTreeMap<usize, Instruction>,
}

impl<'a> CodeEditor<'a> {
    /// Starts editing `code`.
    pub fn new(code: &'a mut Code) -> Self {
        Self { code, insertions: BTreeMap::new(), replacements: BTreeMap::new() }
    }

    /// The original instructions.
    pub fn instructions(&self) -> &[Instruction] {
        &self.code.instructions
    }

    /// The original exception handlers.
    pub fn handlers(&self) -> &[crate::ExceptionHandler] {
        &self.code.handlers
    }

    /// Inserts `instructions` before the original instruction at `position`. Repeated inserts at
    /// the same position run in call order.
    ///
    /// # Panics
    ///
    /// Panics if `position` is not an index of the original body, or if an inserted instruction
    /// is a jump.
    pub fn insert_before(&mut self, position: usize, instructions: impl IntoIterator<Item = Instruction>) {
        assert!(position < self.code.instructions.len(), "insert position {position} out of range");
        let pending = self.insertions.entry(position).or_default();
        for instruction in instructions {
            assert!(!instruction.is_jump(), "inserted instrumentation must not branch");
            pending.push(instruction);
        }
    }

    /// Replaces the original instruction at `position`. Jumps to it keep pointing at it.
    ///
    /// # Panics
    ///
    /// Panics if `position` is not an index of the original body.
    pub fn replace(&mut self, position: usize, instruction: Instruction) {
        assert!(position < self.code.instructions.len(), "replace position {position} out of range");
        self.replacements.insert(position, instruction);
    }

    /// Returns `true` if no edit has been recorded.
    pub fn is_unchanged(&self) -> bool {
        self.insertions.is_empty() && self.replacements.is_empty()
    }

    /// Applies the recorded edits and remaps control flow.
    pub fn finish(mut self) {
        if self.is_unchanged() {
            return
        }

        let original = mem::take(&mut self.code.instructions);
        let inserted: usize = self.insertions.values().map(Vec::len).sum();
        let mut instructions = Vec::with_capacity(original.len() + inserted);
        // old index -> new index of the first instruction executed when control reaches it
        let mut mapping = Vec::with_capacity(original.len() + 1);
        let mut positions = Vec::with_capacity(original.len());

        for (index, instruction) in original.into_iter().enumerate() {
            mapping.push(instructions.len());
            if let Some(pending) = self.insertions.remove(&index) {
                instructions.extend(pending);
            }
            positions.push(instructions.len());
            instructions.push(self.replacements.remove(&index).unwrap_or(instruction));
        }
        mapping.push(instructions.len());

        for position in positions {
            if let Some(target) = instructions[position].jump_target_mut() {
                *target = mapping[*target];
            }
        }
        for handler in &mut self.code.handlers {
            handler.start = mapping[handler.start];
            handler.end = mapping[handler.end];
            handler.handler = mapping[handler.handler];
        }
        self.code.instructions = instructions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CostKind, ExceptionHandler, SandboxOp};

    fn meter() -> Instruction {
        Instruction::Sandbox(SandboxOp::Meter { cost: CostKind::Jump, amount: 1 })
    }

    #[test]
    fn test_jumps_land_on_inserted_instrumentation() {
        // 0: const 3, 1: store 0, 2: load 0, 3: if_zero 5, 4: goto 2, 5: return
        let mut code = Code {
            max_locals: 1,
            instructions: vec![
                Instruction::Const(3),
                Instruction::Store(0),
                Instruction::Load(0),
                Instruction::IfZero(5),
                Instruction::Goto(2),
                Instruction::Return,
            ],
            handlers: Vec::new(),
        };
        let mut editor = CodeEditor::new(&mut code);
        editor.insert_before(2, [meter()]);
        editor.insert_before(4, [meter()]);
        editor.finish();

        assert_eq!(
            code.instructions,
            vec![
                Instruction::Const(3),
                Instruction::Store(0),
                meter(),
                Instruction::Load(0),
                Instruction::IfZero(7),
                meter(),
                Instruction::Goto(2),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn test_handler_ranges_are_remapped() {
        let mut code = Code {
            max_locals: 0,
            instructions: vec![
                Instruction::ConstNull,
                Instruction::Throw,
                Instruction::Pop,
                Instruction::Return,
            ],
            handlers: vec![ExceptionHandler { start: 0, end: 2, handler: 2, catch_type: None }],
        };
        let mut editor = CodeEditor::new(&mut code);
        editor.insert_before(1, [meter()]);
        editor.insert_before(2, [Instruction::Sandbox(SandboxOp::CheckCatch)]);
        editor.finish();

        assert_eq!(code.handlers[0], ExceptionHandler { start: 0, end: 3, handler: 3, catch_type: None });
        assert_eq!(code.instructions[3], Instruction::Sandbox(SandboxOp::CheckCatch));
        assert_eq!(code.instructions[4], Instruction::Pop);
    }

    #[test]
    fn test_replace_keeps_positions() {
        let mut code = Code {
            max_locals: 0,
            instructions: vec![Instruction::ConstNull, Instruction::MonitorEnter, Instruction::Return],
            handlers: Vec::new(),
        };
        let mut editor = CodeEditor::new(&mut code);
        editor.replace(1, Instruction::Pop);
        editor.finish();
        assert_eq!(code.instructions, vec![Instruction::ConstNull, Instruction::Pop, Instruction::Return]);
    }

    #[test]
    #[should_panic(expected = "must not branch")]
    fn test_inserted_jumps_are_refused() {
        let mut code = Code { max_locals: 0, instructions: vec![Instruction::Return], handlers: Vec::new() };
        CodeEditor::new(&mut code).insert_before(0, [Instruction::Goto(0)]);
    }
}
