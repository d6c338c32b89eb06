//! Frame contexts.
//!
//! One [`Frame`] exists per function activation: the code unit, the
//! byte-code cursor, the register file seeded by `init_exec`, the operand
//! stack, and the in-frame context records tracking nested syntactic
//! constructs. The operand stack and the context records are parallel
//! stacks; each record remembers the operand depth at push time, which is
//! what the unwinder drains to.

use std::rc::Rc;

use quill_asm::CodeUnit;

use crate::heap::ObjectId;
use crate::object::PropertyKey;
use crate::value::Value;

/// Context-record classification, including the three-way deferred finally
/// continuation.
#[derive(Debug)]
pub enum ContextKind {
    /// Protected region; `handler` is the position of the `Catch` or
    /// `Finally` opcode receiving abrupt completions.
    Try { handler: usize },
    /// Catch body running; `rejoin` is where a completed catch body
    /// continues (the `Finally` opcode when one exists).
    Catch { rejoin: usize },
    /// Finally body running with a deferred jump continuation.
    FinallyJump { target: usize },
    /// Finally body running with a deferred rethrow.
    FinallyThrow { exception: Value },
    /// Finally body running with a deferred return.
    FinallyReturn { value: Value },
    With,
    Block,
    ForIn {
        /// Snapshot of enumerable property names.
        keys: Vec<PropertyKey>,
        index: usize,
        /// The iterated object, for deleted-name checks.
        object: Value,
    },
    ForOf {
        iterator: Value,
        /// Value produced by the last iterator step.
        next_value: Value,
        /// Unwinding through this record must close the iterator.
        close_iterator: bool,
    },
}

/// One in-frame context marker.
#[derive(Debug)]
pub struct ContextRecord {
    pub kind: ContextKind,
    /// Position of the creating opcode; start of the protected range.
    pub entry: usize,
    /// Exclusive end of the protected range, updated as handler opcodes
    /// execute. Branch targets inside `[entry, end)` are local to the
    /// record.
    pub end: usize,
    /// Operand-stack depth when the record was pushed.
    pub stack_depth: usize,
    /// The record owns a lexical environment released when it pops.
    pub has_lex_env: bool,
}

impl ContextRecord {
    /// Whether a branch target stays inside this record's protected range.
    pub fn contains(&self, target: usize) -> bool {
        (self.entry..self.end).contains(&target)
    }
}

/// Activation record for one function invocation.
#[derive(Debug)]
pub struct Frame {
    pub code: Rc<CodeUnit>,
    /// Byte-code cursor.
    pub pc: usize,
    pub registers: Vec<Value>,
    /// Operand stack; capacity contract is `code.stack_limit`.
    pub stack: Vec<Value>,
    pub contexts: Vec<ContextRecord>,
    /// Current lexical environment (owning reference).
    pub lex_env: ObjectId,
    pub this: Value,
    /// The active callable, absent for global/eval/module frames.
    pub function: Option<ObjectId>,
    /// Accumulator for expression-statement values (`eval` results).
    pub block_result: Value,
    /// Resource name for diagnostics.
    pub resource: Option<Rc<str>>,
}

impl Frame {
    /// Stack-allocate a frame and seed its registers: the first
    /// `argument_end` slots from the call arguments (truncating surplus,
    /// collecting it into a rest array slot when the code asks for one
    /// — see `Interpreter::init_exec`), the rest with `undefined`.
    pub fn new(code: Rc<CodeUnit>, this: Value, lex_env: ObjectId) -> Self {
        let register_end = code.register_end as usize;
        Self {
            code,
            pc: 0,
            registers: vec![Value::Undefined; register_end],
            stack: Vec::with_capacity(register_end),
            contexts: Vec::new(),
            lex_env,
            this,
            function: None,
            block_result: Value::Undefined,
            resource: None,
        }
    }

    pub fn push(&mut self, value: Value) {
        debug_assert!(
            self.stack.len() < self.code.stack_limit as usize,
            "operand stack exceeds the compiled stack limit"
        );
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    pub fn peek(&self) -> &Value {
        self.stack.last().expect("operand stack underflow")
    }

    pub fn peek_at(&self, depth: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - depth]
    }

    pub fn peek_at_mut(&mut self, depth: usize) -> &mut Value {
        let index = self.stack.len() - 1 - depth;
        &mut self.stack[index]
    }

    /// Drop values above `depth` (context-record boundary).
    pub fn drain_stack_to(&mut self, depth: usize) {
        debug_assert!(depth <= self.stack.len());
        self.stack.truncate(depth);
    }

    /// Pop `count` values, preserving their push order.
    pub fn pop_many(&mut self, count: usize) -> Vec<Value> {
        let at = self.stack.len() - count;
        self.stack.split_off(at)
    }

    /// Current operand-stack depth, the quantity context records save.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Normal-return invariant: every context popped, every operand
    /// released.
    pub fn is_balanced(&self) -> bool {
        self.contexts.is_empty() && self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_asm::CodeFlags;

    fn unit() -> Rc<CodeUnit> {
        Rc::new(CodeUnit {
            flags: CodeFlags::empty(),
            argument_end: 0,
            register_end: 3,
            ident_end: 3,
            const_literal_end: 3,
            literal_end: 3,
            stack_limit: 8,
            literals: vec![],
            code: vec![],
        })
    }

    #[test]
    fn registers_start_undefined() {
        let frame = Frame::new(unit(), Value::Undefined, crate::heap::Heap::new().alloc_plain(None));
        assert_eq!(frame.registers, vec![Value::Undefined; 3]);
        assert!(frame.is_balanced());
    }

    #[test]
    fn pop_many_preserves_order() {
        let mut frame = Frame::new(unit(), Value::Undefined, crate::heap::Heap::new().alloc_plain(None));
        frame.push(Value::Int(1));
        frame.push(Value::Int(2));
        frame.push(Value::Int(3));
        assert_eq!(
            frame.pop_many(2),
            vec![Value::Int(2), Value::Int(3)]
        );
        assert_eq!(frame.stack_depth(), 1);
    }

    #[test]
    fn protected_range_is_half_open() {
        let record = ContextRecord {
            kind: ContextKind::Block,
            entry: 4,
            end: 10,
            stack_depth: 0,
            has_lex_env: false,
        };
        assert!(record.contains(4));
        assert!(record.contains(9));
        assert!(!record.contains(10));
        assert!(!record.contains(3));
    }
}
