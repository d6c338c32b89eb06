//! Compiled code units.
//!
//! A code unit is the immutable output of the upstream parser for one
//! function (or the top-level program): a status-flag word, the region
//! bounds of its literal table, the operand-stack capacity, the literal
//! values and the raw opcode bytes. Units serialize to the byte layout
//! described below and nest recursively through sub-function literals.
//!
//! Binary layout (all integers big-endian): `status_flags` (u16), then the
//! six region fields — one byte each in the small-argument form, two bytes
//! each when [`CodeFlags::UINT16_ARGUMENTS`] is set — then the literal
//! table, then the opcode bytes.

use core::fmt;
use std::rc::Rc;

bitflags::bitflags! {
    /// Status flags of a code unit.
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CodeFlags: u16 {
        /// Strict-mode code.
        const STRICT = 0x0001;
        /// A function body rather than global/eval code.
        const IS_FUNCTION = 0x0002;
        /// The unit opens a lexical block environment on entry.
        const LEXICAL_BLOCK = 0x0004;
        /// Region fields are 16-bit; literal indices use the full encoding.
        const UINT16_ARGUMENTS = 0x0008;
        /// Surplus arguments are collected into a rest array.
        const REST_PARAMETER = 0x0010;
        /// Static class member function.
        const STATIC_FUNCTION = 0x0020;
        /// Arrow function: lexical `this`, no own `new.target`.
        const ARROW = 0x0040;
        /// Generator body; calls package a suspended frame.
        const GENERATOR = 0x0080;
        /// Async body; completions are wrapped by `ReturnPromise`.
        const ASYNC = 0x0100;
        /// Module top-level code.
        const MODULE = 0x0200;
        /// The debugger ignores this unit.
        const DEBUGGER_IGNORE = 0x0400;
    }
}

/// A literal table value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Literal {
    /// Numeric constant.
    Number(f64),
    /// String constant or identifier name.
    String(Rc<str>),
    /// Sub-function code unit.
    Function(Rc<CodeUnit>),
}

/// Immutable compiled code for one function or program.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodeUnit {
    pub flags: CodeFlags,
    /// Number of registers seeded from call arguments.
    pub argument_end: u16,
    /// Total register count; also the first identifier-literal index.
    pub register_end: u16,
    /// End of the identifier-name literal region.
    pub ident_end: u16,
    /// End of the constant-literal region.
    pub const_literal_end: u16,
    /// End of the literal table; indices beyond `const_literal_end` are
    /// sub-function units.
    pub literal_end: u16,
    /// Operand-stack capacity in values.
    pub stack_limit: u16,
    /// Literal values for indices in `[register_end, literal_end)`.
    pub literals: Vec<Literal>,
    /// Raw opcode bytes.
    pub code: Vec<u8>,
}

/// Malformed code unit encountered while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDecodeError {
    /// The byte stream ended inside a header, literal or nested unit.
    UnexpectedEnd,
    /// A literal carried an unknown tag byte.
    InvalidLiteralTag(u8),
    /// A literal string was not valid UTF-8.
    InvalidString,
    /// The region bounds are not monotonically non-decreasing.
    InvalidRegions,
}

impl fmt::Display for CodeDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "unexpected end of code unit"),
            Self::InvalidLiteralTag(tag) => write!(f, "invalid literal tag {tag:#04x}"),
            Self::InvalidString => write!(f, "literal string is not valid utf-8"),
            Self::InvalidRegions => write!(f, "literal region bounds are not ordered"),
        }
    }
}

impl std::error::Error for CodeDecodeError {}

const LITERAL_TAG_NUMBER: u8 = 0x00;
const LITERAL_TAG_STRING: u8 = 0x01;
const LITERAL_TAG_FUNCTION: u8 = 0x02;

impl CodeUnit {
    /// Whether literal indices in the stream use the full (uint16-argument)
    /// encoding.
    pub const fn uses_full_encoding(&self) -> bool {
        self.flags.contains(CodeFlags::UINT16_ARGUMENTS)
    }

    pub const fn is_strict(&self) -> bool {
        self.flags.contains(CodeFlags::STRICT)
    }

    pub const fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    pub const fn is_async(&self) -> bool {
        self.flags.contains(CodeFlags::ASYNC)
    }

    pub const fn is_arrow(&self) -> bool {
        self.flags.contains(CodeFlags::ARROW)
    }

    /// A literal index below `register_end` addresses a register slot.
    pub fn is_register_index(&self, index: u16) -> bool {
        index < self.register_end
    }

    /// An identifier-name literal index.
    pub fn is_ident_index(&self, index: u16) -> bool {
        (self.register_end..self.ident_end).contains(&index)
    }

    /// Literal value for a non-register index.
    pub fn literal(&self, index: u16) -> Option<&Literal> {
        index
            .checked_sub(self.register_end)
            .and_then(|i| self.literals.get(i as usize))
    }

    /// Identifier name stored at `index`, if that region holds one.
    pub fn ident_name(&self, index: u16) -> Option<&Rc<str>> {
        if !self.is_ident_index(index) {
            return None;
        }
        match self.literal(index) {
            Some(Literal::String(name)) => Some(name),
            _ => None,
        }
    }

    /// Serialize to the binary layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.code.len());
        out.extend_from_slice(&self.flags.bits().to_be_bytes());

        let fields = [
            self.argument_end,
            self.register_end,
            self.ident_end,
            self.const_literal_end,
            self.literal_end,
            self.stack_limit,
        ];
        for field in fields {
            if self.uses_full_encoding() {
                out.extend_from_slice(&field.to_be_bytes());
            } else {
                out.push(field as u8);
            }
        }

        for literal in &self.literals {
            match literal {
                Literal::Number(n) => {
                    out.push(LITERAL_TAG_NUMBER);
                    out.extend_from_slice(&n.to_be_bytes());
                }
                Literal::String(s) => {
                    out.push(LITERAL_TAG_STRING);
                    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                Literal::Function(unit) => {
                    let nested = unit.encode();
                    out.push(LITERAL_TAG_FUNCTION);
                    out.extend_from_slice(&(nested.len() as u32).to_be_bytes());
                    out.extend_from_slice(&nested);
                }
            }
        }

        out.extend_from_slice(&self.code);
        out
    }

    /// Decode a unit from the binary layout, consuming the whole slice as
    /// opcode bytes after the literal table.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodeDecodeError> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let flags = CodeFlags::from_bits_truncate(cursor.read_u16()?);
        let full = flags.contains(CodeFlags::UINT16_ARGUMENTS);

        let mut fields = [0u16; 6];
        for field in fields.iter_mut() {
            *field = if full {
                cursor.read_u16()?
            } else {
                cursor.read_u8()? as u16
            };
        }
        let [argument_end, register_end, ident_end, const_literal_end, literal_end, stack_limit] =
            fields;

        if argument_end > register_end
            || register_end > ident_end
            || ident_end > const_literal_end
            || const_literal_end > literal_end
        {
            return Err(CodeDecodeError::InvalidRegions);
        }

        let mut literals = Vec::with_capacity((literal_end - register_end) as usize);
        for _ in register_end..literal_end {
            literals.push(cursor.read_literal()?);
        }

        Ok(Self {
            flags,
            argument_end,
            register_end,
            ident_end,
            const_literal_end,
            literal_end,
            stack_limit,
            literals,
            code: bytes[cursor.pos..].to_vec(),
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn read_u8(&mut self) -> Result<u8, CodeDecodeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(CodeDecodeError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, CodeDecodeError> {
        Ok(u16::from_be_bytes([self.read_u8()?, self.read_u8()?]))
    }

    fn read_u32(&mut self) -> Result<u32, CodeDecodeError> {
        Ok((self.read_u16()? as u32) << 16 | self.read_u16()? as u32)
    }

    fn read_exact(&mut self, len: usize) -> Result<&[u8], CodeDecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodeDecodeError::UnexpectedEnd)?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_literal(&mut self) -> Result<Literal, CodeDecodeError> {
        match self.read_u8()? {
            LITERAL_TAG_NUMBER => {
                let raw: [u8; 8] = self.read_exact(8)?.try_into().expect("length checked");
                Ok(Literal::Number(f64::from_be_bytes(raw)))
            }
            LITERAL_TAG_STRING => {
                let len = self.read_u16()? as usize;
                let text = core::str::from_utf8(self.read_exact(len)?)
                    .map_err(|_| CodeDecodeError::InvalidString)?;
                Ok(Literal::String(Rc::from(text)))
            }
            LITERAL_TAG_FUNCTION => {
                let len = self.read_u32()? as usize;
                let nested = CodeUnit::decode(self.read_exact(len)?)?;
                Ok(Literal::Function(Rc::new(nested)))
            }
            tag => Err(CodeDecodeError::InvalidLiteralTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(flags: CodeFlags) -> CodeUnit {
        CodeUnit {
            flags,
            argument_end: 1,
            register_end: 2,
            ident_end: 4,
            const_literal_end: 5,
            literal_end: 5,
            stack_limit: 8,
            literals: vec![
                Literal::String(Rc::from("x")),
                Literal::String(Rc::from("y")),
                Literal::Number(42.5),
            ],
            code: vec![0x10, 0x20, 0x30],
        }
    }

    #[test]
    fn round_trips_small_argument_form() {
        let unit = sample(CodeFlags::STRICT | CodeFlags::IS_FUNCTION);
        assert_eq!(CodeUnit::decode(&unit.encode()).unwrap(), unit);
    }

    #[test]
    fn round_trips_uint16_argument_form() {
        let mut unit = sample(CodeFlags::UINT16_ARGUMENTS);
        unit.stack_limit = 0x1234;
        assert_eq!(CodeUnit::decode(&unit.encode()).unwrap(), unit);
    }

    #[test]
    fn round_trips_nested_functions() {
        let inner = sample(CodeFlags::IS_FUNCTION);
        let mut outer = sample(CodeFlags::empty());
        outer.const_literal_end = 5;
        outer.literal_end = 6;
        outer.literals.push(Literal::Function(Rc::new(inner)));
        assert_eq!(CodeUnit::decode(&outer.encode()).unwrap(), outer);
    }

    #[test]
    fn rejects_unordered_regions() {
        let mut unit = sample(CodeFlags::empty());
        unit.ident_end = 1;
        assert_eq!(
            CodeUnit::decode(&unit.encode()),
            Err(CodeDecodeError::InvalidRegions)
        );
    }

    #[test]
    fn literal_indices_respect_regions() {
        let unit = sample(CodeFlags::empty());
        assert!(unit.is_register_index(1));
        assert!(!unit.is_register_index(2));
        assert_eq!(unit.ident_name(2).unwrap().as_ref(), "x");
        assert_eq!(unit.ident_name(4), None);
        assert!(matches!(unit.literal(4), Some(Literal::Number(n)) if *n == 42.5));
    }
}
