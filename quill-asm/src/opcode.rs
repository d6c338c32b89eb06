//! Opcode tables for the Quill bytecode format.
//!
//! Opcodes are a single byte; the value of [`Opcode::Ext`] (0x00) introduces
//! a second byte indexing the extended table. Decode metadata (operand shape,
//! put disposition, branch width/direction) lives in [`Opcode::meta`] and
//! [`ExtOpcode::meta`], which together form the flat decode table covering
//! the primary and extended regions contiguously.

use crate::decode::{DecodeEntry, OperandShape, PutDisposition};

const fn op(shape: OperandShape, put: PutDisposition) -> DecodeEntry {
    DecodeEntry::new(shape, put)
}

const fn push(shape: OperandShape) -> DecodeEntry {
    DecodeEntry::new(shape, PutDisposition::Stack)
}

const fn side(shape: OperandShape) -> DecodeEntry {
    DecodeEntry::new(shape, PutDisposition::None)
}

const fn fwd(len: u8) -> DecodeEntry {
    DecodeEntry::branch(len, false)
}

const fn bwd(len: u8) -> DecodeEntry {
    DecodeEntry::branch(len, true)
}

/// Primary opcode table.
///
/// Byte-argument conventions not captured by the operand shape: the
/// `*PosByte`/`*NegByte` pushes, `AppendArray`, and the variable-arity call
/// forms (`CallN*`, `CallPropN*`, `NewN*`) read one extra argument byte in
/// their body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::FromRepr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Prefix byte for the extended opcode table.
    Ext = 0x00,

    /// Drop the top of the operand stack.
    Pop,
    /// Move the top of the operand stack into the block result.
    PopBlock,

    /// Push a literal value.
    PushLiteral,
    /// Push two literal values.
    PushTwoLiterals,
    /// Push three literal values (third index read in the body).
    PushThreeLiterals,
    PushUndefined,
    PushNull,
    PushTrue,
    PushFalse,
    /// Push the `this` binding.
    PushThis,
    PushZero,
    /// Push a small non-negative integer (argument byte).
    PushPosByte,
    /// Push a small negative integer (argument byte holds `-(n + 1)`).
    PushNegByte,
    /// Push a literal followed by integer zero.
    PushLitZero,
    /// Push a literal followed by a small non-negative integer.
    PushLitPosByte,
    /// Push a literal followed by a small negative integer.
    PushLitNegByte,
    /// Push a fresh plain object.
    PushObject,
    /// Push a fresh empty fast array.
    PushArray,
    /// Push an array-hole marker (elided array element).
    PushElison,
    /// Append the top N values (argument byte) to the array beneath them.
    AppendArray,
    /// Function expression with its own immutable name binding
    /// (literals: function, name).
    PushNamedFuncExpr,

    /// Push a resolved identifier reference triple:
    /// `(RegisterRef, index, value)` or `(environment, name, value)`.
    IdentReference,
    /// `typeof identifier`; yields `"undefined"` for unresolvable names.
    TypeofIdent,

    CreateVarBinding,
    CreateLetBinding,
    CreateConstBinding,
    /// Initialize a binding with the popped value.
    InitBinding,
    /// Fill an uninitialized let/const slot with the popped value.
    AssignLetConst,
    /// Raise SyntaxError if a conflicting lexical binding exists.
    CheckVar,
    /// Raise SyntaxError if the name is already declared at block scope.
    CheckLet,
    /// Raise TypeError for an assignment to a constant binding.
    ThrowConstError,

    /// Define a named data property on the object at the stack top.
    SetProperty,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,

    BitOr,
    BitXor,
    BitAnd,
    LeftShift,
    RightShift,
    UnsRightShift,
    BitNot,

    Plus,
    Minus,
    Not,
    Void,
    Typeof,

    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    In,
    Instanceof,

    PreIncr,
    PreDecr,
    PostIncr,
    PostDecr,
    PreIncrPush,
    PreDecrPush,
    PostIncrPush,
    PostDecrPush,

    /// Store the popped value through the reference triple beneath it.
    Assign,
    /// Same as [`Opcode::Assign`] but the value is also left on the stack.
    AssignPush,
    /// Store the popped value into the register or binding named by a
    /// literal index.
    AssignSetIdent,
    AssignSetIdentPush,

    /// `base[property]` read; pops both, pushes the value.
    PropGet,
    /// Like [`Opcode::PropGet`] but leaves `(base, property)` beneath the
    /// value for an in-place update.
    PropReference,
    /// `delete base[property]`.
    PropDelete,

    Throw,

    JumpForward,
    JumpForward2,
    JumpForward3,
    JumpBackward,
    JumpBackward2,
    JumpBackward3,
    BranchIfTrueForward,
    BranchIfTrueForward2,
    BranchIfTrueForward3,
    BranchIfTrueBackward,
    BranchIfTrueBackward2,
    BranchIfTrueBackward3,
    BranchIfFalseForward,
    BranchIfFalseForward2,
    BranchIfFalseForward3,
    BranchIfFalseBackward,
    BranchIfFalseBackward2,
    BranchIfFalseBackward3,
    /// Short-circuit branch: the operand stays on the stack when taken.
    BranchIfLogicalTrue,
    BranchIfLogicalTrue2,
    BranchIfLogicalTrue3,
    BranchIfLogicalFalse,
    BranchIfLogicalFalse2,
    BranchIfLogicalFalse3,
    /// Switch dispatch: pops the case value, branches (also popping the
    /// discriminant) when strictly equal to it.
    BranchIfStrictEqual,
    BranchIfStrictEqual2,
    BranchIfStrictEqual3,

    /// Push a TRY context record; the offset points at the handler region.
    TryCreateContext,
    TryCreateContext2,
    TryCreateContext3,
    /// Terminates a completed try body: jumps over the catch block.
    Catch,
    Catch2,
    Catch3,
    /// Convert the active context into a deferred-jump finally record.
    Finally,
    Finally2,
    Finally3,
    /// Pop an object, enter an object-bound environment, push a WITH record.
    WithCreateContext,
    WithCreateContext2,
    WithCreateContext3,
    /// Snapshot enumerable property names, push a FOR-IN record; branches to
    /// the loop condition.
    ForInCreateContext,
    ForInCreateContext2,
    ForInCreateContext3,
    /// Push the next enumerated name still present on the object.
    ForInGetNext,
    /// Backward branch while the FOR-IN snapshot has names left.
    ForInHasNext,
    ForInHasNext2,
    ForInHasNext3,
    /// Pop the top context record and resume its recorded continuation.
    ContextEnd,

    /// Return the popped value.
    Return,
    /// Return the accumulated block result.
    ReturnWithBlock,
    /// Return a literal value.
    ReturnWithLiteral,

    Call0,
    Call0Push,
    Call0Block,
    Call1,
    Call1Push,
    Call1Block,
    Call2,
    Call2Push,
    Call2Block,
    CallN,
    CallNPush,
    CallNBlock,
    CallProp0,
    CallProp0Push,
    CallProp0Block,
    CallProp1,
    CallProp1Push,
    CallProp1Block,
    CallProp2,
    CallProp2Push,
    CallProp2Block,
    CallPropN,
    CallPropNPush,
    CallPropNBlock,
    New0,
    New0Push,
    New1,
    New1Push,
    New2,
    New2Push,
    NewN,
    NewNPush,
}

impl Opcode {
    /// Number of primary opcodes; also the decode-table offset of the
    /// extended region.
    pub const COUNT: usize = Self::NewNPush as usize + 1;

    /// Decode-table entry for this opcode.
    pub const fn meta(self) -> DecodeEntry {
        use Opcode::*;
        use OperandShape::*;
        use PutDisposition::{Block, Ident, Reference};
        match self {
            Ext => side(None),

            Pop => side(Stack),
            PopBlock => op(Stack, Block),

            PushLiteral => push(Literal),
            PushTwoLiterals => push(LiteralLiteral),
            PushThreeLiterals => push(LiteralLiteral),
            PushUndefined | PushNull | PushTrue | PushFalse | PushThis | PushZero
            | PushPosByte | PushNegByte => push(None),
            PushLitZero | PushLitPosByte | PushLitNegByte => push(Literal),
            PushObject | PushArray | PushElison => push(None),
            AppendArray => side(None),
            PushNamedFuncExpr => push(LiteralLiteral),

            IdentReference => side(Literal),
            TypeofIdent => push(Literal),

            CreateVarBinding | CreateLetBinding | CreateConstBinding => side(Literal),
            InitBinding | AssignLetConst => side(StackLiteral),
            CheckVar | CheckLet | ThrowConstError => side(Literal),

            SetProperty => side(StackLiteral).non_static(),

            Add | Sub | Mul | Div | Mod | Exp => push(StackStack),
            BitOr | BitXor | BitAnd | LeftShift | RightShift | UnsRightShift => push(StackStack),
            BitNot | Plus | Minus | Not | Void | Typeof => push(Stack),
            Less | Greater | LessEqual | GreaterEqual | Equal | NotEqual | StrictEqual
            | StrictNotEqual | In | Instanceof => push(StackStack),

            PreIncr | PreDecr | PostIncr | PostDecr => op(None, Reference),
            PreIncrPush | PreDecrPush | PostIncrPush | PostDecrPush => {
                op(None, Reference).push_copy()
            }

            Assign => op(Stack, Reference),
            AssignPush => op(Stack, Reference).push_copy(),
            AssignSetIdent => op(Stack, Ident),
            AssignSetIdentPush => op(Stack, Ident).push_copy(),

            PropGet => push(StackStack),
            PropReference => side(StackStack),
            PropDelete => push(StackStack),

            Throw => side(Stack),

            JumpForward => fwd(1),
            JumpForward2 => fwd(2),
            JumpForward3 => fwd(3),
            JumpBackward => bwd(1),
            JumpBackward2 => bwd(2),
            JumpBackward3 => bwd(3),
            BranchIfTrueForward => fwd(1),
            BranchIfTrueForward2 => fwd(2),
            BranchIfTrueForward3 => fwd(3),
            BranchIfTrueBackward => bwd(1),
            BranchIfTrueBackward2 => bwd(2),
            BranchIfTrueBackward3 => bwd(3),
            BranchIfFalseForward => fwd(1),
            BranchIfFalseForward2 => fwd(2),
            BranchIfFalseForward3 => fwd(3),
            BranchIfFalseBackward => bwd(1),
            BranchIfFalseBackward2 => bwd(2),
            BranchIfFalseBackward3 => bwd(3),
            BranchIfLogicalTrue => fwd(1),
            BranchIfLogicalTrue2 => fwd(2),
            BranchIfLogicalTrue3 => fwd(3),
            BranchIfLogicalFalse => fwd(1),
            BranchIfLogicalFalse2 => fwd(2),
            BranchIfLogicalFalse3 => fwd(3),
            BranchIfStrictEqual => fwd(1),
            BranchIfStrictEqual2 => fwd(2),
            BranchIfStrictEqual3 => fwd(3),

            TryCreateContext => fwd(1),
            TryCreateContext2 => fwd(2),
            TryCreateContext3 => fwd(3),
            Catch => fwd(1),
            Catch2 => fwd(2),
            Catch3 => fwd(3),
            Finally => fwd(1),
            Finally2 => fwd(2),
            Finally3 => fwd(3),
            WithCreateContext => fwd(1),
            WithCreateContext2 => fwd(2),
            WithCreateContext3 => fwd(3),
            ForInCreateContext => fwd(1),
            ForInCreateContext2 => fwd(2),
            ForInCreateContext3 => fwd(3),
            ForInGetNext => push(None),
            ForInHasNext => bwd(1),
            ForInHasNext2 => bwd(2),
            ForInHasNext3 => bwd(3),
            ContextEnd => side(None),

            Return => side(Stack),
            ReturnWithBlock => side(None),
            ReturnWithLiteral => side(Literal),

            Call0 | Call1 | Call2 | CallN => side(None),
            Call0Push | Call1Push | Call2Push | CallNPush => push(None),
            Call0Block | Call1Block | Call2Block | CallNBlock => op(None, Block),
            CallProp0 | CallProp1 | CallProp2 | CallPropN => side(None),
            CallProp0Push | CallProp1Push | CallProp2Push | CallPropNPush => push(None),
            CallProp0Block | CallProp1Block | CallProp2Block | CallPropNBlock => op(None, Block),
            New0 | New1 | New2 | NewN => side(None),
            New0Push | New1Push | New2Push | NewNPush => push(None),
        }
    }

    /// Fixed argument count for compressed call forms; `None` when the count
    /// comes from an argument byte.
    pub const fn fixed_argc(self) -> Option<u8> {
        use Opcode::*;
        match self {
            Call0 | Call0Push | Call0Block | CallProp0 | CallProp0Push | CallProp0Block
            | New0 | New0Push => Some(0),
            Call1 | Call1Push | Call1Block | CallProp1 | CallProp1Push | CallProp1Block
            | New1 | New1Push => Some(1),
            Call2 | Call2Push | Call2Block | CallProp2 | CallProp2Push | CallProp2Block
            | New2 | New2Push => Some(2),
            _ => Option::None,
        }
    }
}

/// Extended opcode table, reached through the [`Opcode::Ext`] prefix.
///
/// Extra argument bytes read in the body: `SpreadArguments`, `SuperCall`,
/// `SpreadSuperCall`, `CallRef` and `CloneContext` (flags), `InitClass`
/// (heritage flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::FromRepr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ExtOpcode {
    /// `delete identifier`; always pushes a boolean.
    DeleteIdent = 0x00,
    /// Push the spread-element marker consumed by `SpreadArguments`.
    PushSpreadElement,
    PushNewTarget,

    /// Collapse the top N values (argument byte), expanding iterables behind
    /// spread-element markers, into one argument collection.
    SpreadArguments,
    SpreadCall,
    SpreadCallProp,
    SpreadNew,
    SpreadSuperCall,

    /// `super(...)` with an argument-count byte.
    SuperCall,
    PushSuperConstructor,
    /// Push a synthesized default constructor.
    PushImplicitCtor,
    /// Enter the class scope environment (literal: class name).
    PushClassEnvironment,
    /// Pop the heritage (flag byte set), build constructor and prototype.
    InitClass,
    /// Initialize the class binding and leave the class scope.
    FinalizeClass,
    /// Push a `super.property` reference triple.
    SuperReference,
    /// Push the lexical `this` binding; TDZ-checked for derived constructors.
    ResolveLexicalThis,

    /// Replace a register or declarative-environment base in the reference
    /// triple below with `undefined` (object-bound bases keep the binding
    /// object), making the triple callable through `CallRef`.
    ResolveBaseForCall,
    /// Call through a resolved reference triple (argument-count byte).
    CallRef,

    CreateGenerator,
    Yield,
    /// Scheduler hint; the value passes through unchanged under direct
    /// execution.
    Await,

    /// Pop an iterable, open its iterator, push a FOR-OF record; branches
    /// to the loop condition.
    ForOfCreateContext,
    ForOfCreateContext2,
    ForOfCreateContext3,
    /// Push the value produced by the last iterator step.
    ForOfGetNext,
    /// Step the iterator; backward branch while it produces values.
    ForOfHasNext,
    ForOfHasNext2,
    ForOfHasNext3,

    GetIterator,
    IteratorStep,
    /// Step the iterator stored one slot deeper (nested destructuring).
    IteratorStep2,
    IteratorStep3,
    IteratorClose,
    /// Skip the default-initializer body when the popped value is defined.
    DefaultInitializer,
    DefaultInitializer2,
    DefaultInitializer3,
    /// Collect the remaining iteration values into a fresh array.
    RestInitializer,
    /// Push a property of the destructuring source at the stack top.
    InitializerPushProp,
    RequireObjectCoercible,

    /// Install a non-enumerable `var` past block scopes (direct eval).
    VarEval,
    /// Same, initialized with a function literal.
    VarEvalInitFunc,

    BlockCreateContext,
    BlockCreateContext2,
    BlockCreateContext3,
    /// Wrap the lexical environment and flag the top context record as
    /// owning it.
    ContextSetLexEnv,
    /// Clone the topmost declarative environment (flag byte: copy bindings).
    CloneContext,

    SetGetter,
    SetSetter,
    /// Early `__proto__:` literal form.
    SetProtoProperty,
    SetComputedProperty,
    SetComputedGetter,
    SetComputedSetter,
    SetStaticProperty,
    SetStaticGetter,
    SetStaticSetter,

    Return,
    /// Wrap the popped completion in a settled promise record.
    ReturnPromise,
}

impl ExtOpcode {
    /// Number of extended opcodes.
    pub const COUNT: usize = Self::ReturnPromise as usize + 1;

    /// Decode-table entry for this opcode.
    pub const fn meta(self) -> DecodeEntry {
        use ExtOpcode::*;
        use OperandShape::*;
        match self {
            DeleteIdent => push(Literal),
            PushSpreadElement | PushNewTarget => push(None),

            SpreadArguments => push(None),
            SpreadCall | SpreadCallProp | SpreadNew => push(None),
            SpreadSuperCall => side(None),

            SuperCall => side(None),
            PushSuperConstructor | PushImplicitCtor => push(None),
            PushClassEnvironment => side(Literal),
            InitClass => push(None),
            FinalizeClass => side(Literal),
            SuperReference => side(ThisLiteral),
            ResolveLexicalThis => push(None),

            ResolveBaseForCall => side(None),
            CallRef => push(None),

            CreateGenerator => side(None),
            Yield => side(Stack),
            Await => push(Stack),

            ForOfCreateContext => fwd(1),
            ForOfCreateContext2 => fwd(2),
            ForOfCreateContext3 => fwd(3),
            ForOfGetNext => push(None),
            ForOfHasNext => bwd(1),
            ForOfHasNext2 => bwd(2),
            ForOfHasNext3 => bwd(3),

            GetIterator => push(Stack),
            IteratorStep | IteratorStep2 | IteratorStep3 => push(None),
            IteratorClose => side(Stack),
            DefaultInitializer => fwd(1),
            DefaultInitializer2 => fwd(2),
            DefaultInitializer3 => fwd(3),
            RestInitializer => push(None),
            InitializerPushProp => push(Literal),
            RequireObjectCoercible => side(None),

            VarEval => side(Literal),
            VarEvalInitFunc => side(LiteralLiteral),

            BlockCreateContext => fwd(1),
            BlockCreateContext2 => fwd(2),
            BlockCreateContext3 => fwd(3),
            ContextSetLexEnv => side(None),
            CloneContext => side(None),

            SetGetter | SetSetter => side(StackLiteral).non_static(),
            SetProtoProperty => side(Stack),
            SetComputedProperty | SetComputedGetter | SetComputedSetter => {
                side(StackStack).non_static()
            }
            SetStaticProperty | SetStaticGetter | SetStaticSetter => side(StackLiteral),

            Return => side(Stack),
            ReturnPromise => side(Stack),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn primary_discriminants_are_dense() {
        for (i, opcode) in Opcode::iter().enumerate() {
            assert_eq!(opcode as usize, i);
            assert_eq!(Opcode::from_repr(i as u8), Some(opcode));
        }
        assert_eq!(Opcode::iter().count(), Opcode::COUNT);
        assert!(Opcode::from_repr(Opcode::COUNT as u8).is_none());
    }

    #[test]
    fn extended_discriminants_are_dense() {
        for (i, opcode) in ExtOpcode::iter().enumerate() {
            assert_eq!(opcode as usize, i);
            assert_eq!(ExtOpcode::from_repr(i as u8), Some(opcode));
        }
        assert_eq!(ExtOpcode::iter().count(), ExtOpcode::COUNT);
    }

    #[test]
    fn ext_prefix_is_zero() {
        assert_eq!(Opcode::Ext as u8, 0x00);
        assert_eq!(Opcode::Ext.meta().shape(), OperandShape::None);
    }

    #[test]
    fn every_entry_is_well_formed() {
        for opcode in Opcode::iter() {
            let meta = opcode.meta();
            let len = meta.branch_offset_len();
            assert!((1..=3).contains(&len), "{opcode:?}");
            if meta.is_backward_branch() {
                assert_eq!(meta.shape(), OperandShape::Branch, "{opcode:?}");
            }
        }
        for opcode in ExtOpcode::iter() {
            let meta = opcode.meta();
            if meta.is_backward_branch() {
                assert_eq!(meta.shape(), OperandShape::Branch, "{opcode:?}");
            }
        }
    }

    #[test]
    fn branch_families_grow_one_byte_per_step() {
        use Opcode::*;
        for family in [
            [JumpForward, JumpForward2, JumpForward3],
            [JumpBackward, JumpBackward2, JumpBackward3],
            [BranchIfTrueForward, BranchIfTrueForward2, BranchIfTrueForward3],
            [BranchIfFalseBackward, BranchIfFalseBackward2, BranchIfFalseBackward3],
            [TryCreateContext, TryCreateContext2, TryCreateContext3],
            [ForInCreateContext, ForInCreateContext2, ForInCreateContext3],
        ] {
            for (i, opcode) in family.iter().enumerate() {
                assert_eq!(opcode.meta().branch_offset_len(), i + 1, "{opcode:?}");
            }
        }
    }

    #[test]
    fn fixed_argc_covers_compressed_calls_only() {
        assert_eq!(Opcode::Call0.fixed_argc(), Some(0));
        assert_eq!(Opcode::CallProp2Block.fixed_argc(), Some(2));
        assert_eq!(Opcode::New1Push.fixed_argc(), Some(1));
        assert_eq!(Opcode::CallN.fixed_argc(), None);
        assert_eq!(Opcode::Add.fixed_argc(), None);
    }
}
