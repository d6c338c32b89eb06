//! Quill bytecode virtual machine.
//!
//! A stack-based interpreter for the compact instruction stream produced by
//! the upstream Quill parser (see the `quill-asm` crate for the byte-code
//! format itself). The VM targets resource-constrained embeddings: a
//! compressed tagged value representation with small-integer fast paths, a
//! single linear frame per activation, and in-frame context records for
//! nested try/with/iteration constructs.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod consts;
pub mod context;
pub mod convert;
pub mod env;
pub mod error;
pub mod heap;
pub mod interpreter;
pub mod object;
pub mod state;
pub mod value;

pub mod prelude {
    pub use quill_asm::{
        Asm, CodeFlags, CodeUnit, CodeUnitBuilder, ErrorKind, ExtOpcode, Opcode,
    };

    pub use crate::context::{Context, StopSignal};
    pub use crate::error::{InterpreterError, RuntimeError};
    pub use crate::heap::{Heap, ObjectId};
    pub use crate::interpreter::Interpreter;
    pub use crate::object::{Object, ObjectKind, Property, PropertyFlags, PropertyKey};
    pub use crate::state::{ExecuteState, ProgramState};
    pub use crate::value::{Symbol, Value};
}
