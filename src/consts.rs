//! VM parameters

/* TAGGED INTEGER RANGE */

/// Largest value representable as a tagged integer.
pub const INTEGER_NUMBER_MAX: i32 = (1 << 29) - 1;

/// Smallest value representable as a tagged integer.
pub const INTEGER_NUMBER_MIN: i32 = -(1 << 29);

/// Multiplication fast-path operand bound; the product of two values within
/// this magnitude stays inside the tagged integer range.
pub const MULTIPLY_MAX: i32 = 1 << 14;

/* EXECUTION LIMITS */

/// Environment-chain walks past this depth raise `RangeError`.
pub const SCOPE_CHAIN_LIMIT: usize = 0xFFFF;

/// Default backward-branch count between VM-stop callback invocations.
pub const DEFAULT_STOP_FREQUENCY: u32 = 1024;

/* LOOKUP CACHE */

/// Slot count of the direct-mapped property lookup cache.
#[cfg(feature = "lookup-cache")]
pub const LOOKUP_CACHE_SIZE: usize = 256;
