//! Context-record resource discipline.
//!
//! Push operations are inline in dispatch; this module centralizes the
//! release side: dropping the operand-stack span a record owns, leaving
//! its lexical environment, closing live iterators and freeing for-in
//! snapshots. Both the `ContextEnd` opcode and the unwinder go through
//! [`Interpreter::context_abort`].

use super::frame::{ContextKind, ContextRecord};
use super::{Frame, Interpreter};
use crate::env;
use crate::error::RuntimeError;

impl Interpreter {
    /// Leave the lexical environment a record wrapped.
    pub(crate) fn release_lex_env(&mut self, frame: &mut Frame) {
        frame.lex_env = env::env_record(&self.heap, frame.lex_env)
            .outer
            .expect("context environment requires an outer scope");
    }

    /// Release every resource of a single popped record: stack span,
    /// wrapped environment, iterator (when flagged) and snapshot buffers.
    pub(crate) fn context_abort(
        &mut self,
        frame: &mut Frame,
        record: ContextRecord,
    ) -> Result<(), RuntimeError> {
        frame.drain_stack_to(record.stack_depth);
        if record.has_lex_env {
            self.release_lex_env(frame);
        }
        match record.kind {
            ContextKind::ForOf {
                iterator,
                close_iterator: true,
                ..
            } => self.iterator_close(&iterator),
            // The for-in snapshot and any parked continuation values drop
            // with the record.
            _ => Ok(()),
        }
    }

    /// Abort every remaining record; the frame is terminating abnormally.
    pub(crate) fn abort_unwind(&mut self, frame: &mut Frame) -> Result<(), RuntimeError> {
        while let Some(record) = frame.contexts.pop() {
            self.context_abort(frame, record)?;
        }
        frame.drain_stack_to(0);
        Ok(())
    }
}
