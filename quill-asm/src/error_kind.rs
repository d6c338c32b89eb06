use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
/// Script error taxonomy surfaced by the interpreter.
pub enum ErrorKind {
    /// An error raised with no specialized constructor.
    Common = 0x00,
    /// Non-callable callee, non-constructor `new` target, property access on
    /// `null`/`undefined`, assignment to a constant binding.
    Type = 0x01,
    /// Unresolvable identifier, temporal dead zone access, repeated
    /// `super()` invocation.
    Reference = 0x02,
    /// Redeclaration detected at the global block scope.
    Syntax = 0x03,
    /// Scope-chain or numeric range overflow.
    Range = 0x04,
    /// Reserved for the `eval` machinery of the host.
    Eval = 0x05,
    /// Reserved for URI-handling builtins of the host.
    Uri = 0x06,
}

impl ErrorKind {
    /// Constructor name a script observes for this kind.
    pub const fn constructor_name(self) -> &'static str {
        match self {
            Self::Common => "Error",
            Self::Type => "TypeError",
            Self::Reference => "ReferenceError",
            Self::Syntax => "SyntaxError",
            Self::Range => "RangeError",
            Self::Eval => "EvalError",
            Self::Uri => "URIError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.constructor_name())
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<u8> for ErrorKind {
    /// Converts the `u8` into an `ErrorKind`, defaulting to `Common`.
    fn from(b: u8) -> Self {
        use ErrorKind::*;
        match b {
            0x01 => Type,
            0x02 => Reference,
            0x03 => Syntax,
            0x04 => Range,
            0x05 => Eval,
            0x06 => Uri,
            _ => Common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn u8_error_kind_round_trip() {
        let last_known: u8 = ErrorKind::iter().last().unwrap() as u8 + 1;
        assert_eq!(ErrorKind::from(0), ErrorKind::Common);

        for i in 1..last_known {
            let kind = ErrorKind::from(i);
            assert_eq!(i, kind as u8);
        }
        for i in last_known..=255 {
            assert_eq!(ErrorKind::from(i), ErrorKind::Common);
        }
    }

    #[test]
    fn constructor_names_match_display() {
        for kind in ErrorKind::iter() {
            assert_eq!(kind.to_string(), kind.constructor_name());
        }
    }
}
