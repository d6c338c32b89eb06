//! Arithmetic, bitwise and relational opcode bodies.
//!
//! Every binary operator first tries the tagged-integer fast path (raw
//! payload arithmetic, no allocation) and promotes to boxed floats on
//! overflow or fractional results. The general paths go through the
//! abstract conversions; symbols poison numeric conversion with
//! `TypeError`.

use quill_asm::ErrorKind;

use super::Interpreter;
use crate::consts::{INTEGER_NUMBER_MAX, INTEGER_NUMBER_MIN, MULTIPLY_MAX};
use crate::convert::{abstract_equals, strict_equals, to_int32, to_number, to_uint32};
use crate::error::RuntimeError;
use crate::value::Value;

/// Relational operator selector shared by the comparison opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

fn in_tagged_range(i: i64) -> bool {
    (INTEGER_NUMBER_MIN as i64..=INTEGER_NUMBER_MAX as i64).contains(&i)
}

impl Interpreter {
    /// Numeric coercion that rejects symbols, collapsing to the tagged form
    /// where possible.
    pub(crate) fn to_numeric(&mut self, value: &Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Int(_) | Value::Float(_) => Ok(value.clone()),
            Value::Sym(_) => Err(self.throw(
                ErrorKind::Type,
                "cannot convert a Symbol to a number".into(),
            )),
            other => Ok(Value::make_number(to_number(&self.heap, other))),
        }
    }

    fn number_of(&mut self, value: &Value) -> Result<f64, RuntimeError> {
        match self.to_numeric(value)? {
            Value::Int(i) => Ok(i as f64),
            Value::Float(f) => Ok(f),
            _ => unreachable!("to_numeric returns numbers"),
        }
    }

    pub(crate) fn op_add(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            let sum = *a as i64 + *b as i64;
            return Ok(if in_tagged_range(sum) {
                Value::Int(sum as i32)
            } else {
                Value::Float(sum as f64)
            });
        }
        if left.is_symbol() || right.is_symbol() {
            return Err(self.throw(
                ErrorKind::Type,
                "cannot convert a Symbol to a primitive".into(),
            ));
        }
        Ok(crate::convert::addition(&self.heap, &left, &right))
    }

    pub(crate) fn op_sub(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            let diff = *a as i64 - *b as i64;
            return Ok(if in_tagged_range(diff) {
                Value::Int(diff as i32)
            } else {
                Value::Float(diff as f64)
            });
        }
        let (a, b) = (self.number_of(&left)?, self.number_of(&right)?);
        Ok(Value::make_number(a - b))
    }

    pub(crate) fn op_mul(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            // Bounded operands cannot overflow the tagged range check.
            if a.abs() <= MULTIPLY_MAX && b.abs() <= MULTIPLY_MAX {
                let product = *a as i64 * *b as i64;
                if in_tagged_range(product) && !(product == 0 && (*a < 0) != (*b < 0)) {
                    return Ok(Value::Int(product as i32));
                }
            }
        }
        let (a, b) = (self.number_of(&left)?, self.number_of(&right)?);
        Ok(Value::make_number(a * b))
    }

    pub(crate) fn op_div(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let (a, b) = (self.number_of(&left)?, self.number_of(&right)?);
        Ok(Value::make_number(a / b))
    }

    /// `%` with the sign of the dividend. The fast path is skipped when the
    /// result would be `-0.0`, which has no tagged representation.
    pub(crate) fn op_mod(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            if *b != 0 {
                let rem = a % b;
                if rem != 0 || *a >= 0 {
                    return Ok(Value::Int(rem));
                }
            }
        }
        let (a, b) = (self.number_of(&left)?, self.number_of(&right)?);
        Ok(Value::make_number(a % b))
    }

    pub(crate) fn op_exp(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let (a, b) = (self.number_of(&left)?, self.number_of(&right)?);
        Ok(Value::make_number(a.powf(b)))
    }

    /// Bitwise group: raw-word arithmetic on two tagged ints (the tag range
    /// is closed under and/or/xor and signed shifts), otherwise the full
    /// int32-conversion path.
    pub(crate) fn op_bitwise(
        &mut self,
        op: BitwiseOp,
        left: Value,
        right: Value,
    ) -> Result<Value, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            let (a, b) = (*a, *b);
            return Ok(match op {
                BitwiseOp::Or => Value::Int(a | b),
                BitwiseOp::Xor => Value::Int(a ^ b),
                BitwiseOp::And => Value::Int(a & b),
                BitwiseOp::Shl => Value::make_int32((a).wrapping_shl(b as u32 & 31)),
                BitwiseOp::Shr => Value::Int(a >> (b as u32 & 31)),
                BitwiseOp::UnsignedShr => {
                    let shifted = (a as u32) >> (b as u32 & 31);
                    Value::make_number(shifted as f64)
                }
            });
        }
        self.do_number_bitwise_logic(op, &left, &right)
    }

    fn do_number_bitwise_logic(
        &mut self,
        op: BitwiseOp,
        left: &Value,
        right: &Value,
    ) -> Result<Value, RuntimeError> {
        let a = to_int32(self.number_of(left)?);
        let b = to_int32(self.number_of(right)?);
        Ok(match op {
            BitwiseOp::Or => Value::make_int32(a | b),
            BitwiseOp::Xor => Value::make_int32(a ^ b),
            BitwiseOp::And => Value::make_int32(a & b),
            BitwiseOp::Shl => Value::make_int32(a.wrapping_shl(b as u32 & 31)),
            BitwiseOp::Shr => Value::make_int32(a >> (b as u32 & 31)),
            BitwiseOp::UnsignedShr => {
                let shifted = to_uint32(a as f64) >> (b as u32 & 31);
                Value::make_number(shifted as f64)
            }
        })
    }

    pub(crate) fn op_bit_not(&mut self, value: Value) -> Result<Value, RuntimeError> {
        if let Value::Int(i) = value {
            // `!i` of an in-range int is always in range.
            return Ok(Value::Int(!i));
        }
        let n = to_int32(self.number_of(&value)?);
        Ok(Value::make_int32(!n))
    }

    pub(crate) fn op_plus(&mut self, value: Value) -> Result<Value, RuntimeError> {
        self.to_numeric(&value)
    }

    pub(crate) fn op_minus(&mut self, value: Value) -> Result<Value, RuntimeError> {
        match value {
            // Negating zero produces -0.0, which must stay boxed.
            Value::Int(i) if i != 0 => Ok(Value::make_int32(-i)),
            other => {
                let n = self.number_of(&other)?;
                Ok(Value::make_number(-n))
            }
        }
    }

    pub(crate) fn op_not(&self, value: &Value) -> Value {
        Value::Bool(!crate::convert::to_boolean(value))
    }

    /// Abstract relational comparison: both string operands compare
    /// lexicographically, anything else numerically (`NaN` poisons).
    pub(crate) fn op_relation(
        &mut self,
        relation: Relation,
        left: Value,
        right: Value,
    ) -> Result<Value, RuntimeError> {
        if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
            return Ok(Value::Bool(match relation {
                Relation::Less => a < b,
                Relation::Greater => a > b,
                Relation::LessEqual => a <= b,
                Relation::GreaterEqual => a >= b,
            }));
        }
        if left.is_symbol() || right.is_symbol() {
            return Err(self.throw(
                ErrorKind::Type,
                "cannot convert a Symbol to a primitive".into(),
            ));
        }
        if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
            return Ok(Value::Bool(match relation {
                Relation::Less => a < b,
                Relation::Greater => a > b,
                Relation::LessEqual => a <= b,
                Relation::GreaterEqual => a >= b,
            }));
        }
        let (a, b) = (self.number_of(&left)?, self.number_of(&right)?);
        Ok(Value::Bool(match relation {
            Relation::Less => a < b,
            Relation::Greater => a > b,
            Relation::LessEqual => a <= b,
            Relation::GreaterEqual => a >= b,
        }))
    }

    pub(crate) fn op_equal(&mut self, left: &Value, right: &Value) -> Value {
        Value::Bool(abstract_equals(&self.heap, left, right))
    }

    pub(crate) fn op_strict_equal(&self, left: &Value, right: &Value) -> Value {
        Value::Bool(strict_equals(left, right))
    }

    /// Shared by the four incr/decr forms: numeric old value plus delta,
    /// with the tagged fast path using a shifted increment.
    pub(crate) fn op_incr_decr(
        &mut self,
        value: &Value,
        delta: i32,
    ) -> Result<(Value, Value), RuntimeError> {
        let old = self.to_numeric(value)?;
        let new = match &old {
            Value::Int(i) => Value::make_int32(i + delta),
            Value::Float(f) => Value::make_number(f + delta as f64),
            _ => unreachable!("to_numeric returns numbers"),
        };
        Ok((old, new))
    }

    /// `typeof` body over an already-fetched operand.
    pub(crate) fn op_typeof(&self, value: &Value) -> Value {
        Value::from(crate::convert::type_of(&self.heap, value))
    }

}

/// Bitwise operator selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BitwiseOp {
    Or,
    Xor,
    And,
    Shl,
    Shr,
    UnsignedShr,
}
