//! Exception unwinding and finally matching.
//!
//! Abrupt completions (throw, return, branch out of a protected region)
//! walk the context records downward. A pending throw is received by the
//! nearest catch or finally handler; a pending return by the nearest
//! finally; a pending jump stops at the first record whose protected range
//! contains the target. Intervening records are aborted, releasing their
//! environments, iterators and buffers. Aborts bypass every handler.

use quill_asm::{BytecodeReader, EffectiveOpcode, Opcode};

use super::frame::ContextKind;
use super::{Frame, Interpreter};
use crate::error::RuntimeError;
use crate::state::ExecuteState;
use crate::value::Value;

/// Abrupt completion travelling down the context stack.
#[derive(Debug)]
pub(crate) enum Pending {
    Throw(Value),
    Return(Value),
    Jump(usize),
}

/// Result of an unwinding walk.
#[derive(Debug)]
pub(crate) enum Unwound {
    /// Control transferred into a handler or finally body; dispatch
    /// resumes at the frame's cursor.
    Resumed,
    /// A pending return survived every context; the frame completes.
    Completed(Value),
}

/// Handler classification at a record's branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    Catch,
    Finally,
    Other,
}

/// Copied-out shape of the top record, so the walk can mutate the frame.
#[derive(Debug, Clone, Copy)]
enum Probe {
    Try { handler: usize },
    Catch { rejoin: usize },
    Other,
}

impl Interpreter {
    /// Walk the records for one able to receive the pending completion,
    /// aborting everything in between.
    pub(crate) fn find_finally(
        &mut self,
        frame: &mut Frame,
        mut pending: Pending,
    ) -> Result<Unwound, RuntimeError> {
        while let Some(record) = frame.contexts.last() {
            if let Pending::Jump(target) = &pending {
                // A jump landing inside the record is local; stop here.
                if record.contains(*target) {
                    frame.pc = *target;
                    return Ok(Unwound::Resumed);
                }
            }
            let probe = match &record.kind {
                ContextKind::Try { handler } => Probe::Try { handler: *handler },
                ContextKind::Catch { rejoin } => Probe::Catch { rejoin: *rejoin },
                _ => Probe::Other,
            };

            match (&pending, probe) {
                (Pending::Throw(_), Probe::Try { handler }) => {
                    let (kind, body, target) = self.read_handler(frame, handler)?;
                    match kind {
                        Handler::Catch => {
                            let Pending::Throw(exception) = pending else {
                                unreachable!()
                            };
                            self.enter_handler(
                                frame,
                                body,
                                target,
                                ContextKind::Catch { rejoin: target },
                            );
                            frame.push(exception);
                            return Ok(Unwound::Resumed);
                        }
                        Handler::Finally => {
                            let Pending::Throw(exception) = pending else {
                                unreachable!()
                            };
                            self.enter_handler(
                                frame,
                                body,
                                target,
                                ContextKind::FinallyThrow { exception },
                            );
                            return Ok(Unwound::Resumed);
                        }
                        Handler::Other => self.abort_top(frame)?,
                    }
                }

                (Pending::Throw(_), Probe::Catch { rejoin }) => {
                    let (kind, body, target) = self.read_handler(frame, rejoin)?;
                    if kind == Handler::Finally {
                        let Pending::Throw(exception) = pending else {
                            unreachable!()
                        };
                        self.enter_handler(
                            frame,
                            body,
                            target,
                            ContextKind::FinallyThrow { exception },
                        );
                        return Ok(Unwound::Resumed);
                    }
                    self.abort_top(frame)?;
                }

                // Return and jump completions are received by finally
                // handlers only.
                (Pending::Return(_) | Pending::Jump(_), Probe::Try { .. } | Probe::Catch { .. }) => {
                    match self.finally_of(frame, probe)? {
                        Some((body, end)) => {
                            let kind = match pending {
                                Pending::Return(value) => ContextKind::FinallyReturn { value },
                                Pending::Jump(target) => ContextKind::FinallyJump { target },
                                Pending::Throw(_) => unreachable!(),
                            };
                            self.enter_handler(frame, body, end, kind);
                            return Ok(Unwound::Resumed);
                        }
                        None => self.abort_top(frame)?,
                    }
                }

                // Running finallys lose their parked continuation to the
                // newer abrupt completion; plain scopes and iteration
                // records release their resources and pass it on.
                _ => self.abort_top(frame)?,
            }
        }

        match pending {
            Pending::Throw(value) => {
                frame.drain_stack_to(0);
                Err(RuntimeError::Throw(value))
            }
            Pending::Return(value) => Ok(Unwound::Completed(value)),
            Pending::Jump(target) => {
                frame.pc = target;
                Ok(Unwound::Resumed)
            }
        }
    }

    fn abort_top(&mut self, frame: &mut Frame) -> Result<(), RuntimeError> {
        let record = frame.contexts.pop().expect("record just observed");
        self.context_abort(frame, record)
    }

    /// Drain to the top record's boundary, release its environment and
    /// convert it into a handler-running record whose protected range
    /// extends to the handler's branch target.
    fn enter_handler(&mut self, frame: &mut Frame, body: usize, end: usize, kind: ContextKind) {
        let (depth, owns_env) = {
            let record = frame.contexts.last().expect("record just observed");
            (record.stack_depth, record.has_lex_env)
        };
        frame.drain_stack_to(depth);
        if owns_env {
            self.release_lex_env(frame);
        }
        let record = frame.contexts.last_mut().expect("record just observed");
        record.has_lex_env = false;
        record.end = end;
        record.kind = kind;
        frame.pc = body;
    }

    /// Finally body (and its branch target) reachable from the top record,
    /// reading through an intervening catch handler.
    fn finally_of(
        &mut self,
        frame: &Frame,
        probe: Probe,
    ) -> Result<Option<(usize, usize)>, RuntimeError> {
        let position = match probe {
            Probe::Try { handler } => handler,
            Probe::Catch { rejoin } => rejoin,
            Probe::Other => return Ok(None),
        };
        let (kind, body, target) = self.read_handler(frame, position)?;
        match kind {
            Handler::Finally => Ok(Some((body, target))),
            Handler::Catch => {
                let (kind, body, target) = self.read_handler(frame, target)?;
                Ok((kind == Handler::Finally).then_some((body, target)))
            }
            Handler::Other => Ok(None),
        }
    }

    /// Decode the handler opcode at `pos`: its classification, the first
    /// byte of its body and its (forward) branch target.
    fn read_handler(
        &self,
        frame: &Frame,
        pos: usize,
    ) -> Result<(Handler, usize, usize), RuntimeError> {
        let mut reader = BytecodeReader::new(&frame.code.code, frame.code.uses_full_encoding());
        reader.seek(pos);
        let opcode = reader.read_opcode()?;
        let meta = opcode.meta();
        let offset = reader.read_branch_offset(meta.branch_offset_len())? as usize;
        let kind = match opcode {
            EffectiveOpcode::Primary(Opcode::Catch | Opcode::Catch2 | Opcode::Catch3) => {
                Handler::Catch
            }
            EffectiveOpcode::Primary(Opcode::Finally | Opcode::Finally2 | Opcode::Finally3) => {
                Handler::Finally
            }
            _ => Handler::Other,
        };
        Ok((kind, reader.pos(), pos + offset))
    }

    /// Route a runtime error raised mid-dispatch: catchable throws search
    /// the context stack; aborts and byte-code faults unwind everything.
    pub(crate) fn unwind(
        &mut self,
        frame: &mut Frame,
        error: RuntimeError,
    ) -> Result<Unwound, RuntimeError> {
        match error {
            RuntimeError::Throw(value) => self.find_finally(frame, Pending::Throw(value)),
            fatal => {
                self.abort_unwind(frame)?;
                Err(fatal)
            }
        }
    }

    /// `ContextEnd`: pop the finished record and resume whatever
    /// continuation it parked.
    pub(crate) fn context_end(
        &mut self,
        frame: &mut Frame,
    ) -> Result<Option<ExecuteState>, RuntimeError> {
        let record = frame.contexts.pop().expect("ContextEnd without a record");
        frame.drain_stack_to(record.stack_depth);
        if record.has_lex_env {
            self.release_lex_env(frame);
        }
        match record.kind {
            ContextKind::FinallyJump { target } => {
                match self.find_finally(frame, Pending::Jump(target))? {
                    Unwound::Resumed => Ok(None),
                    Unwound::Completed(_) => unreachable!("jumps do not complete frames"),
                }
            }
            ContextKind::FinallyThrow { exception } => Err(RuntimeError::Throw(exception)),
            ContextKind::FinallyReturn { value } => {
                match self.find_finally(frame, Pending::Return(value))? {
                    Unwound::Resumed => Ok(None),
                    Unwound::Completed(value) => Ok(Some(ExecuteState::Return(value))),
                }
            }
            ContextKind::ForOf {
                iterator,
                close_iterator: true,
                ..
            } => {
                self.iterator_close(&iterator)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}
