//! Byte-code assembler.
//!
//! A convenience layer for tests and embedders that need to hand-build code
//! units without the upstream parser: [`Asm`] emits opcode bytes with
//! label-resolved branch offsets, [`CodeUnitBuilder`] lays out the literal
//! table regions.
//!
//! Misuse (unbound labels, out-of-order literal registration, oversized
//! offsets) panics: assembled programs are static by nature and a broken one
//! is a bug at the call site.

use std::rc::Rc;

use crate::code::{CodeFlags, CodeUnit, Literal};
use crate::decode::OperandShape;
use crate::opcode::{ExtOpcode, Opcode};
use crate::reader::{DELTA_FULL, DELTA_SMALL, LIMIT_FULL, LIMIT_SMALL};

/// A forward or backward branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    /// Offset of the three magnitude bytes inside the code buffer.
    patch_at: usize,
    /// Offset of the branch instruction's opcode byte.
    instr_at: usize,
    label: Label,
    backward: bool,
}

/// Label-resolving opcode emitter.
#[derive(Debug, Default)]
pub struct Asm {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    full_encoding: bool,
}

impl Asm {
    /// Assembler for the small literal-index encoding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembler for the full (uint16-argument) literal-index encoding.
    pub fn full_encoding() -> Self {
        Self {
            full_encoding: true,
            ..Self::default()
        }
    }

    /// Emit a primary opcode.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        debug_assert!(
            op.meta().shape() != OperandShape::Branch,
            "branch opcodes take a label: {op:?}"
        );
        self.code.push(op as u8);
        self
    }

    /// Emit an extended opcode.
    pub fn ext(&mut self, op: ExtOpcode) -> &mut Self {
        self.code.push(Opcode::Ext as u8);
        self.code.push(op as u8);
        self
    }

    /// Emit a raw argument byte.
    pub fn byte(&mut self, byte: u8) -> &mut Self {
        self.code.push(byte);
        self
    }

    /// Emit a literal index in the configured encoding.
    pub fn lit(&mut self, index: u16) -> &mut Self {
        if self.full_encoding {
            assert!(index < DELTA_FULL, "literal index out of range: {index}");
            if index < LIMIT_FULL as u16 {
                self.code.push(index as u8);
            } else {
                let [hi, lo] = (index + DELTA_FULL).to_be_bytes();
                self.code.push(hi);
                self.code.push(lo);
            }
        } else {
            assert!(index <= DELTA_SMALL + 0xFF, "literal index out of range: {index}");
            if index < LIMIT_SMALL as u16 {
                self.code.push(index as u8);
            } else {
                self.code.push(LIMIT_SMALL);
                self.code.push((index - DELTA_SMALL) as u8);
            }
        }
        self
    }

    /// Create an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current position.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        assert!(self.labels[label.0].is_none(), "label bound twice");
        self.labels[label.0] = Some(self.code.len());
        self
    }

    /// Create a label bound to the current position (backward targets).
    pub fn here(&mut self) -> Label {
        let label = self.label();
        self.bind(label);
        label
    }

    /// Emit the widest (three-byte) member of a primary branch family with a
    /// label-resolved offset. Pass the one-byte family base, e.g.
    /// [`Opcode::JumpForward`] or [`Opcode::ForInHasNext`].
    pub fn branch(&mut self, family: Opcode, label: Label) -> &mut Self {
        let meta = family.meta();
        assert!(
            meta.shape() == OperandShape::Branch && meta.branch_offset_len() == 1,
            "not a branch family base: {family:?}"
        );
        let wide = Opcode::from_repr(family as u8 + 2).expect("family has a three-byte member");
        self.code.push(wide as u8);
        self.reserve_offset(label, meta.is_backward_branch(), 1);
        self
    }

    /// Extended-table variant of [`Asm::branch`].
    pub fn ext_branch(&mut self, family: ExtOpcode, label: Label) -> &mut Self {
        let meta = family.meta();
        assert!(
            meta.shape() == OperandShape::Branch && meta.branch_offset_len() == 1,
            "not a branch family base: {family:?}"
        );
        let wide = ExtOpcode::from_repr(family as u8 + 2).expect("family has a three-byte member");
        self.code.push(Opcode::Ext as u8);
        self.code.push(wide as u8);
        self.reserve_offset(label, meta.is_backward_branch(), 2);
        self
    }

    /// `opcode_len` is the emitted opcode byte count; the offset base is the
    /// first of those bytes (the prefix byte for extended opcodes).
    fn reserve_offset(&mut self, label: Label, backward: bool, opcode_len: usize) {
        let instr_at = self.code.len() - opcode_len;
        self.fixups.push(Fixup {
            patch_at: self.code.len(),
            instr_at,
            label,
            backward,
        });
        self.code.extend_from_slice(&[0, 0, 0]);
    }

    /// Resolve all labels and return the code bytes.
    pub fn finish(mut self) -> Vec<u8> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].expect("unbound label");
            let magnitude = if fixup.backward {
                assert!(target <= fixup.instr_at, "backward branch to later target");
                fixup.instr_at - target
            } else {
                assert!(target >= fixup.instr_at, "forward branch to earlier target");
                target - fixup.instr_at
            };
            assert!(magnitude < 1 << 24, "branch offset out of range");
            let bytes = (magnitude as u32).to_be_bytes();
            self.code[fixup.patch_at..fixup.patch_at + 3].copy_from_slice(&bytes[1..]);
        }
        self.code
    }
}

/// Literal-table layout helper producing a [`CodeUnit`].
///
/// Identifier names, constants and sub-functions must be registered in that
/// order (matching their table regions) and before the code is attached.
#[derive(Debug)]
pub struct CodeUnitBuilder {
    flags: CodeFlags,
    argument_end: u16,
    register_end: u16,
    stack_limit: u16,
    idents: Vec<Rc<str>>,
    constants: Vec<Literal>,
    functions: Vec<Rc<CodeUnit>>,
}

impl CodeUnitBuilder {
    pub fn new(argument_end: u16, register_end: u16) -> Self {
        assert!(argument_end <= register_end);
        Self {
            flags: CodeFlags::empty(),
            argument_end,
            register_end,
            stack_limit: 16,
            idents: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: CodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn stack_limit(mut self, limit: u16) -> Self {
        self.stack_limit = limit;
        self
    }

    /// Register an identifier name; returns its literal index.
    pub fn ident(&mut self, name: &str) -> u16 {
        assert!(
            self.constants.is_empty() && self.functions.is_empty(),
            "identifiers must precede constants and functions"
        );
        if let Some(i) = self.idents.iter().position(|n| n.as_ref() == name) {
            return self.register_end + i as u16;
        }
        self.idents.push(Rc::from(name));
        self.register_end + (self.idents.len() - 1) as u16
    }

    /// Register a numeric constant; returns its literal index.
    pub fn number(&mut self, value: f64) -> u16 {
        self.constant(Literal::Number(value))
    }

    /// Register a string constant; returns its literal index.
    pub fn string(&mut self, value: &str) -> u16 {
        self.constant(Literal::String(Rc::from(value)))
    }

    fn constant(&mut self, literal: Literal) -> u16 {
        assert!(self.functions.is_empty(), "constants must precede functions");
        self.constants.push(literal);
        self.register_end + (self.idents.len() + self.constants.len() - 1) as u16
    }

    /// Register a sub-function; returns its literal index.
    pub fn function(&mut self, unit: CodeUnit) -> u16 {
        self.functions.push(Rc::new(unit));
        self.register_end
            + (self.idents.len() + self.constants.len() + self.functions.len() - 1) as u16
    }

    /// Attach the code bytes and produce the unit.
    pub fn finish(self, code: Vec<u8>) -> CodeUnit {
        let ident_end = self.register_end + self.idents.len() as u16;
        let const_literal_end = ident_end + self.constants.len() as u16;
        let literal_end = const_literal_end + self.functions.len() as u16;

        let mut literals: Vec<Literal> =
            self.idents.into_iter().map(Literal::String).collect();
        literals.extend(self.constants);
        literals.extend(self.functions.into_iter().map(Literal::Function));

        CodeUnit {
            flags: self.flags,
            argument_end: self.argument_end,
            register_end: self.register_end,
            ident_end,
            const_literal_end,
            literal_end,
            stack_limit: self.stack_limit,
            literals,
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{BytecodeReader, EffectiveOpcode};

    #[test]
    fn forward_branch_resolves_from_opcode_byte() {
        let mut asm = Asm::new();
        let end = asm.label();
        asm.branch(Opcode::JumpForward, end);
        asm.op(Opcode::PushUndefined);
        asm.bind(end);
        let code = asm.finish();

        let mut reader = BytecodeReader::new(&code, false);
        assert_eq!(
            reader.read_opcode(),
            Ok(EffectiveOpcode::Primary(Opcode::JumpForward3))
        );
        // Offset spans the opcode byte, three offset bytes and the push.
        assert_eq!(reader.read_branch_offset(3), Ok(5));
    }

    #[test]
    fn backward_branch_targets_earlier_code() {
        let mut asm = Asm::new();
        let top = asm.here();
        asm.op(Opcode::PushUndefined).op(Opcode::Pop);
        asm.branch(Opcode::JumpBackward, top);
        let code = asm.finish();

        let mut reader = BytecodeReader::new(&code, false);
        reader.seek(2);
        assert_eq!(
            reader.read_opcode(),
            Ok(EffectiveOpcode::Primary(Opcode::JumpBackward3))
        );
        assert_eq!(reader.read_branch_offset(3), Ok(2));
    }

    #[test]
    fn extended_branch_base_is_the_prefix_byte() {
        let mut asm = Asm::new();
        let end = asm.label();
        asm.ext_branch(ExtOpcode::BlockCreateContext, end);
        asm.bind(end);
        let code = asm.finish();

        let mut reader = BytecodeReader::new(&code, false);
        assert_eq!(
            reader.read_opcode(),
            Ok(EffectiveOpcode::Extended(ExtOpcode::BlockCreateContext3))
        );
        assert_eq!(reader.read_branch_offset(3), Ok(5));
    }

    #[test]
    fn literal_regions_follow_registration_order() {
        let mut builder = CodeUnitBuilder::new(0, 2);
        let x = builder.ident("x");
        let y = builder.ident("y");
        let n = builder.number(3.5);
        let unit = builder.finish(vec![]);

        assert_eq!((x, y, n), (2, 3, 4));
        assert_eq!(unit.ident_end, 4);
        assert_eq!(unit.const_literal_end, 5);
        assert_eq!(unit.literal_end, 5);
        assert_eq!(unit.ident_name(2).unwrap().as_ref(), "x");
    }

    #[test]
    fn idents_are_deduplicated() {
        let mut builder = CodeUnitBuilder::new(0, 0);
        assert_eq!(builder.ident("n"), builder.ident("n"));
    }
}
