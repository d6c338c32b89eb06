//! Main dispatch loop.
//!
//! Two nested loops: [`Interpreter::dispatch`] handles exception unwinding
//! and re-entry, [`Interpreter::step`] decodes and executes one opcode —
//! operand fetch per the decode entry, the opcode body, then result
//! routing per the put disposition. Deferred invocations surface as
//! [`ExecuteState`] values for the executor; everything else stays inside
//! the loop.

use std::rc::Rc;

use quill_asm::{
    BytecodeReader, CodeUnit, EffectiveOpcode, ErrorKind, ExtOpcode, Literal, Opcode,
    OperandShape, PutDisposition, ReadError,
};

use crate::context::StopSignal;
use crate::convert::{to_boolean, to_prop_key, strict_equals};
use crate::env::{self, EnvKind};
use crate::error::RuntimeError;
use crate::heap::ObjectId;
use crate::interpreter::alu::{BitwiseOp, Relation};
use crate::interpreter::binding::BindingKind;
use crate::interpreter::frame::{ContextKind, ContextRecord};
use crate::interpreter::unwind::{Pending, Unwound};
use crate::interpreter::{Frame, Interpreter};
use crate::object::{ObjectKind, PromiseState, Property, PropertyFlags, PropertyKey};
use crate::state::{CallKind, ExecuteState};
use crate::value::Value;

/// Conservative instruction-length pad covering a `HasNext` opcode and its
/// widest offset, so loop records protect their own condition row.
const LOOP_TAIL_PAD: usize = 6;

impl Interpreter {
    /// Outer loop: drive [`Interpreter::step`], routing raised errors
    /// through the unwinder until the frame completes or defers.
    pub(crate) fn dispatch(&mut self, frame: &mut Frame) -> Result<ExecuteState, RuntimeError> {
        let code = frame.code.clone();
        loop {
            match self.step(frame, &code) {
                Ok(Some(state)) => return Ok(state),
                Ok(None) => {}
                Err(error) => match self.unwind(frame, error)? {
                    Unwound::Resumed => {}
                    Unwound::Completed(value) => return Ok(ExecuteState::Return(value)),
                },
            }
        }
    }

    /// Decode and execute one opcode.
    fn step(
        &mut self,
        frame: &mut Frame,
        code: &Rc<CodeUnit>,
    ) -> Result<Option<ExecuteState>, RuntimeError> {
        let start = frame.pc;
        let strict = code.is_strict();
        let mut reader = BytecodeReader::new(&code.code, code.uses_full_encoding());
        reader.seek(start);

        let opcode = reader.read_opcode()?;
        let meta = opcode.meta();
        tracing::trace!(?opcode, pc = start, "step");

        let mut left = Value::Undefined;
        let mut right = Value::Undefined;
        let mut lit_a: u16 = 0;
        let mut lit_b: u16 = 0;
        let mut branch_target: usize = 0;

        match meta.shape() {
            OperandShape::None => {}
            OperandShape::Stack => left = frame.pop(),
            OperandShape::StackStack => {
                right = frame.pop();
                left = frame.pop();
            }
            OperandShape::Literal => lit_a = reader.read_literal_index()?,
            OperandShape::LiteralLiteral => {
                lit_a = reader.read_literal_index()?;
                lit_b = reader.read_literal_index()?;
            }
            OperandShape::StackLiteral => {
                left = frame.pop();
                lit_a = reader.read_literal_index()?;
            }
            OperandShape::ThisLiteral => {
                left = frame.this.clone();
                lit_a = reader.read_literal_index()?;
            }
            OperandShape::Branch => {
                let offset = reader.read_branch_offset(meta.branch_offset_len())? as usize;
                branch_target = if meta.is_backward_branch() {
                    start
                        .checked_sub(offset)
                        .ok_or(RuntimeError::Bytecode(ReadError::UnexpectedEnd))?
                } else {
                    start + offset
                };
                // Backward branches are the cooperative interruption point.
                if meta.is_backward_branch() {
                    match self.context.poll_stop() {
                        StopSignal::Continue => {}
                        StopSignal::Throw(value) => return Err(RuntimeError::Throw(value)),
                        StopSignal::Abort(value) => return Err(RuntimeError::Abort(value)),
                    }
                }
            }
        }

        let result = match opcode {
            EffectiveOpcode::Primary(op) => {
                self.step_primary(frame, &mut reader, op, start, strict, OperandPack {
                    left,
                    right,
                    lit_a,
                    lit_b,
                    branch_target,
                })?
            }
            EffectiveOpcode::Extended(op) => {
                self.step_extended(frame, &mut reader, op, start, strict, OperandPack {
                    left,
                    right,
                    lit_a,
                    lit_b,
                    branch_target,
                })?
            }
        };

        let value = match result {
            Body::Value(value) => value,
            Body::Done => {
                frame.pc = reader.pos();
                return Ok(None);
            }
            Body::Jumped => return Ok(None),
            Body::State(state) => {
                frame.pc = reader.pos();
                return Ok(Some(state));
            }
            Body::StateAt(state) => return Ok(Some(state)),
        };

        match meta.put() {
            PutDisposition::None => {}
            PutDisposition::Stack => frame.push(value),
            PutDisposition::Block => frame.block_result = value,
            PutDisposition::Ident => {
                let index = reader.read_literal_index()?;
                if meta.pushes_copy() {
                    frame.push(value.clone());
                }
                self.put_ident_value(frame, index, value)?;
            }
            PutDisposition::Reference => {
                let prop = frame.pop();
                let base = frame.pop();
                if meta.pushes_copy() {
                    frame.push(value.clone());
                }
                match base {
                    Value::RegisterRef(index) => frame.registers[index as usize] = value,
                    base => self.set_value(&base, &prop, value, strict)?,
                }
            }
        }
        frame.pc = reader.pos();
        Ok(None)
    }
}

/// Operands fetched for one step.
struct OperandPack {
    left: Value,
    right: Value,
    lit_a: u16,
    lit_b: u16,
    branch_target: usize,
}

/// Body outcome feeding the put-disposition routing.
enum Body {
    /// Route this value per the decode entry.
    Value(Value),
    /// Side effects only; advance the cursor.
    Done,
    /// The body moved the cursor itself.
    Jumped,
    /// Defer to the executor; cursor advances first.
    State(ExecuteState),
    /// Defer to the executor; cursor already positioned.
    StateAt(ExecuteState),
}

impl Interpreter {
    #[allow(clippy::too_many_arguments)]
    fn step_primary(
        &mut self,
        frame: &mut Frame,
        reader: &mut BytecodeReader<'_>,
        op: Opcode,
        start: usize,
        strict: bool,
        ops: OperandPack,
    ) -> Result<Body, RuntimeError> {
        let OperandPack {
            left,
            right,
            lit_a,
            lit_b,
            branch_target,
        } = ops;
        use Opcode::*;

        Ok(match op {
            Ext => unreachable!("the reader resolves extended opcodes"),

            Pop => Body::Done,
            PopBlock => Body::Value(left),

            PushLiteral => Body::Value(self.literal_value(frame, lit_a)?),
            PushTwoLiterals => {
                let first = self.literal_value(frame, lit_a)?;
                frame.push(first);
                Body::Value(self.literal_value(frame, lit_b)?)
            }
            PushThreeLiterals => {
                let third = reader.read_literal_index()?;
                let first = self.literal_value(frame, lit_a)?;
                frame.push(first);
                let second = self.literal_value(frame, lit_b)?;
                frame.push(second);
                Body::Value(self.literal_value(frame, third)?)
            }
            PushUndefined => Body::Value(Value::Undefined),
            PushNull => Body::Value(Value::Null),
            PushTrue => Body::Value(Value::Bool(true)),
            PushFalse => Body::Value(Value::Bool(false)),
            PushThis => Body::Value(frame.this.clone()),
            PushZero => Body::Value(Value::Int(0)),
            PushPosByte => Body::Value(Value::Int(reader.read_byte_arg()? as i32)),
            PushNegByte => Body::Value(Value::Int(-(reader.read_byte_arg()? as i32) - 1)),
            PushLitZero => {
                let lit = self.literal_value(frame, lit_a)?;
                frame.push(lit);
                Body::Value(Value::Int(0))
            }
            PushLitPosByte => {
                let lit = self.literal_value(frame, lit_a)?;
                frame.push(lit);
                Body::Value(Value::Int(reader.read_byte_arg()? as i32))
            }
            PushLitNegByte => {
                let lit = self.literal_value(frame, lit_a)?;
                frame.push(lit);
                Body::Value(Value::Int(-(reader.read_byte_arg()? as i32) - 1))
            }
            PushObject => {
                let id = self.heap.alloc_plain(None);
                Body::Value(Value::Object(id))
            }
            PushArray => {
                let id = self.heap.alloc_array(Vec::new());
                Body::Value(Value::Object(id))
            }
            PushElison => Body::Value(Value::ArrayHole),
            AppendArray => {
                let count = reader.read_byte_arg()? as usize;
                self.append_array(frame, count)?;
                Body::Done
            }
            PushNamedFuncExpr => {
                let unit = self.function_literal(frame, lit_a)?;
                let name = self.ident_name(frame, lit_b);
                Body::Value(self.create_named_func_expr(frame, unit, name))
            }

            IdentReference => {
                self.ident_reference(frame, lit_a)?;
                Body::Done
            }
            TypeofIdent => Body::Value(self.typeof_ident(frame, lit_a)?),

            CreateVarBinding => {
                self.create_binding(frame, lit_a, BindingKind::Var)?;
                Body::Done
            }
            CreateLetBinding => {
                self.create_binding(frame, lit_a, BindingKind::Let)?;
                Body::Done
            }
            CreateConstBinding => {
                self.create_binding(frame, lit_a, BindingKind::Const)?;
                Body::Done
            }
            InitBinding => {
                self.init_binding(frame, lit_a, left)?;
                Body::Done
            }
            AssignLetConst => {
                self.assign_let_const(frame, lit_a, left);
                Body::Done
            }
            CheckVar => {
                self.check_var(frame, lit_a)?;
                Body::Done
            }
            CheckLet => {
                self.check_let(frame, lit_a)?;
                Body::Done
            }
            ThrowConstError => return Err(self.throw_const_error(frame, lit_a)),

            SetProperty => {
                let name = self.name_literal(frame, lit_a);
                let key = to_prop_key(&self.heap, &name);
                self.define_member(frame, key, MemberForm::Data(left), true)?;
                Body::Done
            }

            Add => Body::Value(self.op_add(left, right)?),
            Sub => Body::Value(self.op_sub(left, right)?),
            Mul => Body::Value(self.op_mul(left, right)?),
            Div => Body::Value(self.op_div(left, right)?),
            Mod => Body::Value(self.op_mod(left, right)?),
            Exp => Body::Value(self.op_exp(left, right)?),

            BitOr => Body::Value(self.op_bitwise(BitwiseOp::Or, left, right)?),
            BitXor => Body::Value(self.op_bitwise(BitwiseOp::Xor, left, right)?),
            BitAnd => Body::Value(self.op_bitwise(BitwiseOp::And, left, right)?),
            LeftShift => Body::Value(self.op_bitwise(BitwiseOp::Shl, left, right)?),
            RightShift => Body::Value(self.op_bitwise(BitwiseOp::Shr, left, right)?),
            UnsRightShift => Body::Value(self.op_bitwise(BitwiseOp::UnsignedShr, left, right)?),
            BitNot => Body::Value(self.op_bit_not(left)?),

            Plus => Body::Value(self.op_plus(left)?),
            Minus => Body::Value(self.op_minus(left)?),
            Not => Body::Value(self.op_not(&left)),
            Void => Body::Value(Value::Undefined),
            Typeof => Body::Value(self.op_typeof(&left)),

            // `LESS` of two tagged ints may fuse with a following backward
            // conditional branch, executing both in one step.
            Less => {
                if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
                    let cond = *a < *b;
                    if let Some(body) = self.try_fuse_branch(frame, reader, cond)? {
                        return Ok(body);
                    }
                    Body::Value(Value::Bool(cond))
                } else {
                    Body::Value(self.op_relation(Relation::Less, left, right)?)
                }
            }
            Greater => Body::Value(self.op_relation(Relation::Greater, left, right)?),
            LessEqual => Body::Value(self.op_relation(Relation::LessEqual, left, right)?),
            GreaterEqual => {
                Body::Value(self.op_relation(Relation::GreaterEqual, left, right)?)
            }
            Equal => Body::Value(self.op_equal(&left, &right)),
            NotEqual => {
                let Value::Bool(eq) = self.op_equal(&left, &right) else {
                    unreachable!()
                };
                Body::Value(Value::Bool(!eq))
            }
            StrictEqual => Body::Value(self.op_strict_equal(&left, &right)),
            StrictNotEqual => {
                let Value::Bool(eq) = self.op_strict_equal(&left, &right) else {
                    unreachable!()
                };
                Body::Value(Value::Bool(!eq))
            }
            In => Body::Value(Value::Bool(self.in_value(&left, &right)?)),
            Instanceof => Body::Value(Value::Bool(self.instanceof_value(&left, &right)?)),

            PreIncr | PreDecr | PostIncr | PostDecr | PreIncrPush | PreDecrPush
            | PostIncrPush | PostDecrPush => {
                let delta = match op {
                    PreIncr | PostIncr | PreIncrPush | PostIncrPush => 1,
                    _ => -1,
                };
                let post = matches!(op, PostIncr | PostDecr | PostIncrPush | PostDecrPush);
                let value = frame.pop();
                let prop = frame.pop();
                let base = frame.pop();
                let (old, new) = self.op_incr_decr(&value, delta)?;
                if matches!(op, PreIncrPush | PreDecrPush | PostIncrPush | PostDecrPush) {
                    frame.push(if post { old } else { new.clone() });
                }
                match base {
                    Value::RegisterRef(index) => frame.registers[index as usize] = new,
                    base => self.set_value(&base, &prop, new, strict)?,
                }
                Body::Done
            }

            Assign | AssignPush => Body::Value(left),
            AssignSetIdent | AssignSetIdentPush => Body::Value(left),

            PropGet => Body::Value(self.get_value(&left, &right)?),
            PropReference => {
                let value = self.get_value(&left, &right)?;
                frame.push(left);
                frame.push(right);
                frame.push(value);
                Body::Done
            }
            PropDelete => {
                Body::Value(Value::Bool(self.delete_property_value(&left, &right, strict)?))
            }

            Throw => return Err(RuntimeError::Throw(left)),

            JumpForward | JumpForward2 | JumpForward3 | JumpBackward | JumpBackward2
            | JumpBackward3 => {
                self.jump_to(frame, branch_target)?;
                Body::Jumped
            }
            BranchIfTrueForward | BranchIfTrueForward2 | BranchIfTrueForward3
            | BranchIfTrueBackward | BranchIfTrueBackward2 | BranchIfTrueBackward3 => {
                let cond = to_boolean(&frame.pop());
                self.conditional_jump(frame, reader, cond, branch_target)?;
                Body::Jumped
            }
            BranchIfFalseForward | BranchIfFalseForward2 | BranchIfFalseForward3
            | BranchIfFalseBackward | BranchIfFalseBackward2 | BranchIfFalseBackward3 => {
                let cond = !to_boolean(&frame.pop());
                self.conditional_jump(frame, reader, cond, branch_target)?;
                Body::Jumped
            }
            BranchIfLogicalTrue | BranchIfLogicalTrue2 | BranchIfLogicalTrue3 => {
                let value = frame.pop();
                if to_boolean(&value) {
                    frame.push(value);
                    self.jump_to(frame, branch_target)?;
                } else {
                    frame.pc = reader.pos();
                }
                Body::Jumped
            }
            BranchIfLogicalFalse | BranchIfLogicalFalse2 | BranchIfLogicalFalse3 => {
                let value = frame.pop();
                if !to_boolean(&value) {
                    frame.push(value);
                    self.jump_to(frame, branch_target)?;
                } else {
                    frame.pc = reader.pos();
                }
                Body::Jumped
            }
            BranchIfStrictEqual | BranchIfStrictEqual2 | BranchIfStrictEqual3 => {
                let case_value = frame.pop();
                if strict_equals(frame.peek(), &case_value) {
                    frame.pop();
                    self.jump_to(frame, branch_target)?;
                } else {
                    frame.pc = reader.pos();
                }
                Body::Jumped
            }

            TryCreateContext | TryCreateContext2 | TryCreateContext3 => {
                frame.contexts.push(ContextRecord {
                    kind: ContextKind::Try {
                        handler: branch_target,
                    },
                    entry: start,
                    end: branch_target,
                    stack_depth: frame.stack_depth(),
                    has_lex_env: false,
                });
                Body::Done
            }
            // Normal completion of a try body: skip the catch handler.
            Catch | Catch2 | Catch3 => {
                frame.pc = branch_target;
                Body::Jumped
            }
            Finally | Finally2 | Finally3 => {
                self.enter_finally_normally(frame, branch_target);
                Body::Done
            }

            WithCreateContext | WithCreateContext2 | WithCreateContext3 => {
                let value = frame.pop();
                let object = self.to_object(&value)?;
                let depth = frame.stack_depth();
                let with_env = env::create_object_lex_env(
                    &mut self.heap,
                    Some(frame.lex_env),
                    object,
                    true,
                );
                frame.contexts.push(ContextRecord {
                    kind: ContextKind::With,
                    entry: start,
                    end: branch_target,
                    stack_depth: depth,
                    has_lex_env: true,
                });
                frame.push(Value::ReleaseLexEnv);
                frame.lex_env = with_env;
                Body::Done
            }

            ForInCreateContext | ForInCreateContext2 | ForInCreateContext3 => {
                let value = frame.pop();
                let (keys, object) = self
                    .for_in_snapshot(&value)?
                    .unwrap_or((Vec::new(), Value::Undefined));
                frame.contexts.push(ContextRecord {
                    kind: ContextKind::ForIn {
                        keys,
                        index: 0,
                        object,
                    },
                    entry: start,
                    end: branch_target + LOOP_TAIL_PAD,
                    stack_depth: frame.stack_depth(),
                    has_lex_env: false,
                });
                frame.pc = branch_target;
                Body::Jumped
            }
            ForInGetNext => {
                let record = frame
                    .contexts
                    .last_mut()
                    .expect("ForInGetNext without a context");
                let ContextKind::ForIn { keys, index, .. } = &mut record.kind else {
                    unreachable!("ForInGetNext over a non-for-in record")
                };
                let key = keys.get(*index).expect("HasNext guarantees a name");
                let name = key.to_value();
                *index += 1;
                Body::Value(name)
            }
            ForInHasNext | ForInHasNext2 | ForInHasNext3 => {
                if self.for_in_has_next(frame) {
                    frame.pc = branch_target;
                } else {
                    let record = frame.contexts.pop().expect("for-in record missing");
                    self.context_abort(frame, record)?;
                    frame.pc = reader.pos();
                }
                Body::Jumped
            }

            ContextEnd => match self.context_end(frame)? {
                Some(state) => Body::State(state),
                None => Body::Done,
            },

            Return => self.do_return(frame, left)?,
            ReturnWithBlock => {
                let value = std::mem::take(&mut frame.block_result);
                self.do_return(frame, value)?
            }
            ReturnWithLiteral => {
                let value = self.literal_value(frame, lit_a)?;
                self.do_return(frame, value)?
            }

            Call0 | Call0Push | Call0Block | Call1 | Call1Push | Call1Block | Call2
            | Call2Push | Call2Block | CallN | CallNPush | CallNBlock => {
                let argc = self.call_argc(op, reader)?;
                Body::State(ExecuteState::Call {
                    kind: CallKind::Call,
                    argc,
                    spread: false,
                    put: op.meta().put(),
                })
            }
            CallProp0 | CallProp0Push | CallProp0Block | CallProp1 | CallProp1Push
            | CallProp1Block | CallProp2 | CallProp2Push | CallProp2Block | CallPropN
            | CallPropNPush | CallPropNBlock => {
                let argc = self.call_argc(op, reader)?;
                Body::State(ExecuteState::Call {
                    kind: CallKind::CallProp,
                    argc,
                    spread: false,
                    put: op.meta().put(),
                })
            }
            New0 | New0Push | New1 | New1Push | New2 | New2Push | NewN | NewNPush => {
                let argc = self.call_argc(op, reader)?;
                Body::State(ExecuteState::Call {
                    kind: CallKind::Construct,
                    argc,
                    spread: false,
                    put: op.meta().put(),
                })
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn step_extended(
        &mut self,
        frame: &mut Frame,
        reader: &mut BytecodeReader<'_>,
        op: ExtOpcode,
        start: usize,
        strict: bool,
        ops: OperandPack,
    ) -> Result<Body, RuntimeError> {
        let OperandPack {
            left,
            right,
            lit_a,
            lit_b,
            branch_target,
        } = ops;
        let _ = strict;
        use ExtOpcode::*;

        Ok(match op {
            DeleteIdent => Body::Value(self.delete_ident(frame, lit_a)?),
            PushSpreadElement => Body::Value(Value::SpreadElement),
            PushNewTarget => Body::Value(self.context.new_target.clone()),

            SpreadArguments => {
                let count = reader.read_byte_arg()? as usize;
                Body::Value(self.spread_arguments(frame, count)?)
            }
            SpreadCall => Body::State(ExecuteState::Call {
                kind: CallKind::Call,
                argc: 0,
                spread: true,
                put: op.meta().put(),
            }),
            SpreadCallProp => Body::State(ExecuteState::Call {
                kind: CallKind::CallProp,
                argc: 0,
                spread: true,
                put: op.meta().put(),
            }),
            SpreadNew => Body::State(ExecuteState::Call {
                kind: CallKind::Construct,
                argc: 0,
                spread: true,
                put: op.meta().put(),
            }),
            SpreadSuperCall => Body::State(ExecuteState::Call {
                kind: CallKind::SuperCall,
                argc: 0,
                spread: true,
                put: op.meta().put(),
            }),

            SuperCall => {
                let argc = reader.read_byte_arg()? as u16;
                Body::State(ExecuteState::Call {
                    kind: CallKind::SuperCall,
                    argc,
                    spread: false,
                    put: op.meta().put(),
                })
            }
            PushSuperConstructor => Body::Value(self.push_super_constructor(frame)?),
            PushImplicitCtor => {
                let has_heritage = reader.read_byte_arg()? != 0;
                Body::Value(self.push_implicit_ctor(frame, has_heritage))
            }
            PushClassEnvironment => {
                self.push_class_environment(frame, lit_a);
                Body::Done
            }
            InitClass => {
                let has_heritage = reader.read_byte_arg()? != 0;
                Body::Value(self.init_class(frame, has_heritage)?)
            }
            FinalizeClass => {
                self.finalize_class(frame, lit_a);
                Body::Done
            }
            SuperReference => {
                self.super_reference(frame, left, lit_a)?;
                Body::Done
            }
            ResolveLexicalThis => Body::Value(self.resolve_lexical_this(frame)?),

            ResolveBaseForCall => {
                self.resolve_base_for_call(frame);
                Body::Done
            }
            CallRef => {
                let argc = reader.read_byte_arg()? as u16;
                Body::State(ExecuteState::Call {
                    kind: CallKind::CallRef,
                    argc,
                    spread: false,
                    put: op.meta().put(),
                })
            }

            CreateGenerator => Body::State(ExecuteState::CreateGenerator),
            Yield => Body::State(ExecuteState::Yield(left)),
            Await => Body::Value(left),

            ForOfCreateContext | ForOfCreateContext2 | ForOfCreateContext3 => {
                let value = frame.pop();
                let iterator = self.get_iterator(&value)?;
                frame.contexts.push(ContextRecord {
                    kind: ContextKind::ForOf {
                        iterator,
                        next_value: Value::Undefined,
                        close_iterator: true,
                    },
                    entry: start,
                    end: branch_target + LOOP_TAIL_PAD,
                    stack_depth: frame.stack_depth(),
                    has_lex_env: false,
                });
                frame.pc = branch_target;
                Body::Jumped
            }
            ForOfGetNext => {
                let record = frame
                    .contexts
                    .last()
                    .expect("ForOfGetNext without a context");
                let ContextKind::ForOf { next_value, .. } = &record.kind else {
                    unreachable!("ForOfGetNext over a non-for-of record")
                };
                Body::Value(next_value.clone())
            }
            ForOfHasNext | ForOfHasNext2 | ForOfHasNext3 => {
                if self.for_of_step(frame)? {
                    frame.pc = branch_target;
                } else {
                    let record = frame.contexts.pop().expect("for-of record missing");
                    self.context_abort(frame, record)?;
                    frame.pc = reader.pos();
                }
                Body::Jumped
            }

            GetIterator => Body::Value(self.get_iterator(&left)?),
            IteratorStep | IteratorStep2 | IteratorStep3 => {
                let depth = match op {
                    IteratorStep => 0,
                    IteratorStep2 => 1,
                    _ => 2,
                };
                let iterator = frame.peek_at(depth).clone();
                let stepped = self.iterator_step(&iterator)?;
                Body::Value(stepped.unwrap_or_default())
            }
            IteratorClose => {
                self.iterator_close(&left)?;
                Body::Done
            }
            DefaultInitializer | DefaultInitializer2 | DefaultInitializer3 => {
                if frame.peek().is_undefined() {
                    frame.pop();
                    frame.pc = reader.pos();
                } else {
                    self.jump_to(frame, branch_target)?;
                }
                Body::Jumped
            }
            RestInitializer => {
                let iterator = frame.peek().clone();
                let mut items = Vec::new();
                while let Some(item) = self.iterator_step(&iterator)? {
                    items.push(item);
                }
                let array = self.heap.alloc_array(items);
                Body::Value(Value::Object(array))
            }
            InitializerPushProp => {
                let source = frame.peek().clone();
                let name = self.name_literal(frame, lit_a);
                Body::Value(self.get_value(&source, &name)?)
            }
            RequireObjectCoercible => {
                if !crate::convert::is_object_coercible(frame.peek()) {
                    let value = frame.peek().clone();
                    return Err(self.throw(
                        ErrorKind::Type,
                        format!("cannot destructure {value}"),
                    ));
                }
                Body::Done
            }

            VarEval => {
                self.var_eval(frame, lit_a, None)?;
                Body::Done
            }
            VarEvalInitFunc => {
                let function = self.literal_value(frame, lit_b)?;
                self.var_eval(frame, lit_a, Some(function))?;
                Body::Done
            }

            BlockCreateContext | BlockCreateContext2 | BlockCreateContext3 => {
                let depth = frame.stack_depth();
                let block_env =
                    env::create_decl_lex_env(&mut self.heap, Some(frame.lex_env), true);
                frame.contexts.push(ContextRecord {
                    kind: ContextKind::Block,
                    entry: start,
                    end: branch_target,
                    stack_depth: depth,
                    has_lex_env: true,
                });
                frame.push(Value::ReleaseLexEnv);
                frame.lex_env = block_env;
                Body::Done
            }
            ContextSetLexEnv => {
                let block_env =
                    env::create_decl_lex_env(&mut self.heap, Some(frame.lex_env), true);
                frame.push(Value::ReleaseLexEnv);
                frame.lex_env = block_env;
                let record = frame
                    .contexts
                    .last_mut()
                    .expect("ContextSetLexEnv without a context");
                record.has_lex_env = true;
                Body::Done
            }
            CloneContext => {
                let copy_bindings = reader.read_byte_arg()? != 0;
                self.clone_context(frame, copy_bindings);
                Body::Done
            }

            SetGetter => {
                let name = self.name_literal(frame, lit_a);
                let key = to_prop_key(&self.heap, &name);
                self.define_member(frame, key, MemberForm::Getter(left), true)?;
                Body::Done
            }
            SetSetter => {
                let name = self.name_literal(frame, lit_a);
                let key = to_prop_key(&self.heap, &name);
                self.define_member(frame, key, MemberForm::Setter(left), true)?;
                Body::Done
            }
            SetProtoProperty => {
                let target = frame.peek().as_object().expect("object literal underflow");
                match left {
                    Value::Object(proto) => self.heap.get_mut(target).prototype = Some(proto),
                    Value::Null => self.heap.get_mut(target).prototype = None,
                    _ => {}
                }
                Body::Done
            }
            SetComputedProperty | SetComputedGetter | SetComputedSetter => {
                let key = to_prop_key(&self.heap, &left);
                let form = match op {
                    SetComputedProperty => MemberForm::Data(right),
                    SetComputedGetter => MemberForm::Getter(right),
                    _ => MemberForm::Setter(right),
                };
                self.define_member(frame, key, form, true)?;
                Body::Done
            }
            SetStaticProperty => {
                let name = self.name_literal(frame, lit_a);
                let key = to_prop_key(&self.heap, &name);
                self.define_member(frame, key, MemberForm::Data(left), false)?;
                Body::Done
            }
            SetStaticGetter => {
                let name = self.name_literal(frame, lit_a);
                let key = to_prop_key(&self.heap, &name);
                self.define_member(frame, key, MemberForm::Getter(left), false)?;
                Body::Done
            }
            SetStaticSetter => {
                let name = self.name_literal(frame, lit_a);
                let key = to_prop_key(&self.heap, &name);
                self.define_member(frame, key, MemberForm::Setter(left), false)?;
                Body::Done
            }

            Return => self.do_return(frame, left)?,
            ReturnPromise => {
                let promise = self.make_promise(PromiseState::Fulfilled(left));
                self.do_return(frame, promise)?
            }
        })
    }

    /// `Return` family: discharge pending finallys, then complete.
    fn do_return(&mut self, frame: &mut Frame, value: Value) -> Result<Body, RuntimeError> {
        if frame.contexts.is_empty() {
            frame.drain_stack_to(0);
            return Ok(Body::StateAt(ExecuteState::Return(value)));
        }
        match self.find_finally(frame, Pending::Return(value))? {
            Unwound::Resumed => Ok(Body::Jumped),
            Unwound::Completed(value) => {
                frame.drain_stack_to(0);
                Ok(Body::StateAt(ExecuteState::Return(value)))
            }
        }
    }

    /// Branches route through the finally search so targets leaving a
    /// protected region discharge it first.
    fn jump_to(&mut self, frame: &mut Frame, target: usize) -> Result<(), RuntimeError> {
        if frame.contexts.is_empty() {
            frame.pc = target;
            return Ok(());
        }
        match self.find_finally(frame, Pending::Jump(target))? {
            Unwound::Resumed => Ok(()),
            Unwound::Completed(_) => unreachable!("jumps do not complete frames"),
        }
    }

    fn conditional_jump(
        &mut self,
        frame: &mut Frame,
        reader: &BytecodeReader<'_>,
        cond: bool,
        target: usize,
    ) -> Result<(), RuntimeError> {
        if cond {
            self.jump_to(frame, target)
        } else {
            frame.pc = reader.pos();
            Ok(())
        }
    }

    /// Fixed or byte-encoded argument count of a call family member.
    fn call_argc(
        &self,
        op: Opcode,
        reader: &mut BytecodeReader<'_>,
    ) -> Result<u16, RuntimeError> {
        match op.fixed_argc() {
            Some(n) => Ok(n as u16),
            None => Ok(reader.read_byte_arg()? as u16),
        }
    }

    /// `LESS` fusion: when the next opcode is a backward conditional
    /// branch, evaluate it in the same step.
    fn try_fuse_branch(
        &mut self,
        frame: &mut Frame,
        reader: &mut BytecodeReader<'_>,
        cond: bool,
    ) -> Result<Option<Body>, RuntimeError> {
        use Opcode::*;
        let save = reader.pos();
        let Ok(next) = reader.read_opcode() else {
            reader.seek(save);
            return Ok(None);
        };
        let (wants, meta) = match next {
            EffectiveOpcode::Primary(
                op @ (BranchIfTrueBackward | BranchIfTrueBackward2 | BranchIfTrueBackward3),
            ) => (true, op.meta()),
            EffectiveOpcode::Primary(
                op @ (BranchIfFalseBackward | BranchIfFalseBackward2 | BranchIfFalseBackward3),
            ) => (false, op.meta()),
            _ => {
                reader.seek(save);
                return Ok(None);
            }
        };
        let offset = reader.read_branch_offset(meta.branch_offset_len())? as usize;
        match self.context.poll_stop() {
            StopSignal::Continue => {}
            StopSignal::Throw(value) => return Err(RuntimeError::Throw(value)),
            StopSignal::Abort(value) => return Err(RuntimeError::Abort(value)),
        }
        if cond == wants {
            let target = save
                .checked_sub(offset)
                .ok_or(RuntimeError::Bytecode(ReadError::UnexpectedEnd))?;
            self.jump_to(frame, target)?;
        } else {
            frame.pc = reader.pos();
        }
        Ok(Some(Body::Jumped))
    }

    /// Normal entry into a finally body: the record parks a jump to the
    /// construct's continuation.
    fn enter_finally_normally(&mut self, frame: &mut Frame, target: usize) {
        let (depth, owns_env) = {
            let record = frame
                .contexts
                .last()
                .expect("Finally without a context");
            (record.stack_depth, record.has_lex_env)
        };
        frame.drain_stack_to(depth);
        if owns_env {
            self.release_lex_env(frame);
        }
        let record = frame
            .contexts
            .last_mut()
            .expect("Finally without a context");
        record.has_lex_env = false;
        record.kind = ContextKind::FinallyJump { target };
        record.end = target;
    }

    /// `ForInHasNext` guard: advance past names deleted since the snapshot
    /// without consuming the next live one.
    fn for_in_has_next(&mut self, frame: &mut Frame) -> bool {
        let record = frame
            .contexts
            .last_mut()
            .expect("ForInHasNext without a context");
        let ContextKind::ForIn {
            keys,
            index,
            object,
        } = &mut record.kind
        else {
            unreachable!("ForInHasNext over a non-for-in record")
        };
        let Some(id) = object.as_object() else {
            return false;
        };
        while let Some(key) = keys.get(*index) {
            if self.has_property(id, key) {
                return true;
            }
            *index += 1;
        }
        false
    }

    /// `ForOfHasNext` guard: one iterator step, parking the produced value
    /// in the record. The close flag drops during the step so a throwing
    /// `next` is not followed by a `return` call.
    fn for_of_step(&mut self, frame: &mut Frame) -> Result<bool, RuntimeError> {
        let iterator = {
            let record = frame
                .contexts
                .last_mut()
                .expect("ForOfHasNext without a context");
            let ContextKind::ForOf {
                iterator,
                close_iterator,
                ..
            } = &mut record.kind
            else {
                unreachable!("ForOfHasNext over a non-for-of record")
            };
            *close_iterator = false;
            iterator.clone()
        };
        let stepped = self.iterator_step(&iterator)?;
        let record = frame
            .contexts
            .last_mut()
            .expect("ForOfHasNext without a context");
        let ContextKind::ForOf {
            next_value,
            close_iterator,
            ..
        } = &mut record.kind
        else {
            unreachable!("ForOfHasNext over a non-for-of record")
        };
        match stepped {
            Some(value) => {
                *next_value = value;
                *close_iterator = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `ResolveBaseForCall`: register and declarative-environment bases in
    /// the reference triple become `undefined`; `with` binding objects stay
    /// as the implicit receiver.
    fn resolve_base_for_call(&mut self, frame: &mut Frame) {
        let replace = match frame.peek_at(2) {
            Value::RegisterRef(_) => true,
            Value::Object(id) => {
                matches!(self.heap.get(*id).kind, ObjectKind::Environment(_))
            }
            _ => false,
        };
        if replace {
            *frame.peek_at_mut(2) = Value::Undefined;
        }
    }

    /// `CloneContext`: fresh declarative environment over the same outer,
    /// optionally copying the bindings (per-iteration `let` scopes).
    fn clone_context(&mut self, frame: &mut Frame, copy_bindings: bool) {
        let (outer, block, bindings) = {
            let record = env::env_record(&self.heap, frame.lex_env);
            let bindings = match (&record.kind, copy_bindings) {
                (EnvKind::Declarative { bindings, .. }, true) => bindings.clone(),
                _ => Vec::new(),
            };
            (record.outer, record.is_block(), bindings)
        };
        let fresh = env::create_decl_lex_env(&mut self.heap, outer, block);
        for (name, binding) in bindings {
            env::env_record_mut(&mut self.heap, fresh).set_binding(name, binding);
        }
        frame.lex_env = fresh;
    }

    /// `AppendArray`: move the popped values into the array beneath them,
    /// expanding spread markers.
    fn append_array(&mut self, frame: &mut Frame, count: usize) -> Result<(), RuntimeError> {
        let values = frame.pop_many(count);
        let array = frame
            .peek()
            .as_object()
            .expect("array literal underflow");
        let mut items = Vec::with_capacity(values.len());
        let mut spread_next = false;
        for value in values {
            match value {
                Value::SpreadElement => spread_next = true,
                value if spread_next => {
                    spread_next = false;
                    self.iterate_collect(&value, &mut items)?;
                }
                value => items.push(value),
            }
        }
        self.heap
            .get_mut(array)
            .elements_mut()
            .expect("array literal target is a fast array")
            .extend(items);
        Ok(())
    }

    /// Literal-table fetch with value semantics: registers read through,
    /// identifier-region indices resolve the named binding (the compiler's
    /// variable reads), constants collapse to the tagged forms, and
    /// function literals close over the current scope.
    fn literal_value(&mut self, frame: &Frame, index: u16) -> Result<Value, RuntimeError> {
        if frame.code.is_register_index(index) {
            return Ok(frame.registers[index as usize].clone());
        }
        if frame.code.is_ident_index(index) {
            let name = self.ident_name(frame, index);
            return match self.resolve_binding(frame.lex_env, &name)? {
                Some(location) => self.get_binding_value(location, &name),
                None => Err(self.throw(
                    ErrorKind::Reference,
                    format!("'{name}' is not defined"),
                )),
            };
        }
        match frame.code.literal(index) {
            Some(Literal::Number(n)) => Ok(Value::make_number(*n)),
            Some(Literal::String(s)) => Ok(Value::Str(s.clone())),
            Some(Literal::Function(unit)) => {
                let unit = unit.clone();
                Ok(self.create_function(frame, unit, None))
            }
            None => Err(RuntimeError::Bytecode(ReadError::UnexpectedEnd)),
        }
    }

    /// Literal-table fetch with name semantics: identifier and string
    /// literals read as the property name they spell.
    fn name_literal(&self, frame: &Frame, index: u16) -> Value {
        match frame.code.literal(index) {
            Some(Literal::String(s)) => Value::Str(s.clone()),
            Some(Literal::Number(n)) => Value::make_number(*n),
            _ => Value::Undefined,
        }
    }

    /// Function literal fetch for forms that must not instantiate yet.
    fn function_literal(
        &mut self,
        frame: &Frame,
        index: u16,
    ) -> Result<Rc<CodeUnit>, RuntimeError> {
        match frame.code.literal(index) {
            Some(Literal::Function(unit)) => Ok(unit.clone()),
            _ => Err(RuntimeError::Bytecode(ReadError::UnexpectedEnd)),
        }
    }

    /// Shared member definition for object literals and class bodies.
    fn define_member(
        &mut self,
        frame: &mut Frame,
        key: PropertyKey,
        form: MemberForm,
        non_static: bool,
    ) -> Result<(), RuntimeError> {
        let (target, is_class) = self.member_target(frame, non_static)?;
        let value = match &form {
            MemberForm::Data(v) | MemberForm::Getter(v) | MemberForm::Setter(v) => v.clone(),
        };
        self.set_home_object(&value, target);

        let mut flags = PropertyFlags::WRITABLE | PropertyFlags::CONFIGURABLE;
        if !is_class {
            flags |= PropertyFlags::ENUMERABLE;
        }
        match form {
            MemberForm::Data(value) => {
                self.heap
                    .define_property(target, key, Property::Data { value, flags });
            }
            MemberForm::Getter(getter) => {
                self.define_accessor(target, key, Some(getter), None, flags)
            }
            MemberForm::Setter(setter) => {
                self.define_accessor(target, key, None, Some(setter), flags)
            }
        }
        Ok(())
    }

    /// Merge an accessor half into an existing pair, or create one.
    fn define_accessor(
        &mut self,
        target: ObjectId,
        key: PropertyKey,
        getter: Option<Value>,
        setter: Option<Value>,
        flags: PropertyFlags,
    ) {
        let getter = getter.and_then(|v| v.as_object());
        let setter = setter.and_then(|v| v.as_object());
        if let Some(Property::Accessor { get, set, .. }) =
            self.heap.get_mut(target).own_property_mut(&key)
        {
            if getter.is_some() {
                *get = getter;
            }
            if setter.is_some() {
                *set = setter;
            }
            return;
        }
        let flags = flags & !PropertyFlags::WRITABLE;
        self.heap.define_property(
            target,
            key,
            Property::Accessor {
                get: getter,
                set: setter,
                flags,
            },
        );
    }

    fn set_home_object(&mut self, value: &Value, home: ObjectId) {
        if let Value::Object(id) = value {
            if let ObjectKind::Function(data) = &mut self.heap.get_mut(*id).kind {
                data.home_object = Some(home);
            }
        }
    }
}

/// Member definition forms of the object-literal and class opcodes.
enum MemberForm {
    Data(Value),
    Getter(Value),
    Setter(Value),
}
