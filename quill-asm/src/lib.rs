#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod asm;
mod code;
mod decode;
mod error_kind;
mod opcode;
mod reader;

pub use asm::{Asm, CodeUnitBuilder, Label};
pub use code::{CodeDecodeError, CodeFlags, CodeUnit, Literal};
pub use decode::{DecodeEntry, OperandShape, PutDisposition};
pub use error_kind::ErrorKind;
pub use opcode::{ExtOpcode, Opcode};
pub use reader::{
    BytecodeReader, EffectiveOpcode, ReadError, DELTA_FULL, DELTA_SMALL, LIMIT_FULL, LIMIT_SMALL,
};
