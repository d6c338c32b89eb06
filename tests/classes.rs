//! Class construction, inheritance and super sequencing.

mod common;

use common::{run, run_in, uncaught_kind};
use quill_vm::prelude::*;

/// `constructor() { super(); super() }`
fn double_super_ctor() -> CodeUnit {
    let mut cb = CodeUnitBuilder::new(0, 0);
    let mut casm = Asm::new();
    casm.ext(ExtOpcode::SuperCall).byte(0);
    casm.ext(ExtOpcode::SuperCall).byte(0);
    casm.ext(ExtOpcode::ResolveLexicalThis);
    casm.op(Opcode::Return);
    cb.flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(casm.finish())
}

// class A {}; class B extends A { constructor() { super(); super() } }; new B()
#[test]
fn second_super_call_raises_reference_error() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let a = b.ident("A");
    let b_name = b.ident("B");
    let ctor_lit = b.function(double_super_ctor());

    let mut asm = Asm::new();
    // class A {}
    asm.op(Opcode::CreateVarBinding).lit(a);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(a);
    asm.ext(ExtOpcode::PushImplicitCtor).byte(0);
    asm.ext(ExtOpcode::InitClass).byte(0);
    asm.ext(ExtOpcode::FinalizeClass).lit(a);
    asm.op(Opcode::InitBinding).lit(a);

    // class B extends A { ... }
    asm.op(Opcode::CreateVarBinding).lit(b_name);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(b_name);
    asm.op(Opcode::PushLiteral).lit(a);
    asm.op(Opcode::PushLiteral).lit(ctor_lit);
    asm.ext(ExtOpcode::InitClass).byte(1);
    asm.ext(ExtOpcode::FinalizeClass).lit(b_name);
    asm.op(Opcode::InitBinding).lit(b_name);

    // new B()
    asm.op(Opcode::PushLiteral).lit(b_name);
    asm.op(Opcode::New0Push);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let mut vm = Interpreter::new();
    let err = run_in(&mut vm, b.finish(asm.finish())).unwrap_err();
    assert_eq!(uncaught_kind(&vm, &err), Some(ErrorKind::Reference));
}

// class A { constructor() { this.v = 1 }  m() { return 10 } }
// class B extends A { constructor() { super(); this.w = 2 }
//                     m() { return super.m() + this.w } }
// new B().m()  → 12
#[test]
fn super_method_calls_resolve_through_home_objects() {
    // A's constructor
    let mut cab = CodeUnitBuilder::new(0, 0);
    let v_name = cab.string("v");
    let mut ca = Asm::new();
    ca.ext(ExtOpcode::ResolveLexicalThis);
    ca.op(Opcode::PushLiteral).lit(v_name);
    ca.op(Opcode::PushPosByte).byte(1);
    ca.op(Opcode::Assign);
    ca.op(Opcode::PushUndefined);
    ca.op(Opcode::Return);
    let ctor_a = cab
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(ca.finish());

    // A.prototype.m
    let mut mab = CodeUnitBuilder::new(0, 0);
    let mut ma = Asm::new();
    ma.op(Opcode::PushPosByte).byte(10);
    ma.op(Opcode::Return);
    let m_a = mab
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(ma.finish());

    // B's constructor
    let mut cbb = CodeUnitBuilder::new(0, 0);
    let w_name = cbb.string("w");
    let mut cb = Asm::new();
    cb.ext(ExtOpcode::SuperCall).byte(0);
    cb.ext(ExtOpcode::ResolveLexicalThis);
    cb.op(Opcode::PushLiteral).lit(w_name);
    cb.op(Opcode::PushPosByte).byte(2);
    cb.op(Opcode::Assign);
    cb.ext(ExtOpcode::ResolveLexicalThis);
    cb.op(Opcode::Return);
    let ctor_b = cbb
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(cb.finish());

    // B.prototype.m
    let mut mbb = CodeUnitBuilder::new(0, 0);
    let m_ident = mbb.ident("m");
    let w_str = mbb.string("w");
    let mut mb = Asm::new();
    mb.ext(ExtOpcode::SuperReference).lit(m_ident);
    mb.ext(ExtOpcode::CallRef).byte(0);
    mb.op(Opcode::PushThis);
    mb.op(Opcode::PushLiteral).lit(w_str);
    mb.op(Opcode::PropGet);
    mb.op(Opcode::Add);
    mb.op(Opcode::Return);
    let m_b = mbb
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(mb.finish());

    let mut b = CodeUnitBuilder::new(0, 0);
    let a = b.ident("A");
    let b_name = b.ident("B");
    let m = b.ident("m");
    let m_str = b.string("m");
    let ctor_a_lit = b.function(ctor_a);
    let m_a_lit = b.function(m_a);
    let ctor_b_lit = b.function(ctor_b);
    let m_b_lit = b.function(m_b);

    let mut asm = Asm::new();
    // class A
    asm.op(Opcode::CreateVarBinding).lit(a);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(a);
    asm.op(Opcode::PushLiteral).lit(ctor_a_lit);
    asm.ext(ExtOpcode::InitClass).byte(0);
    asm.op(Opcode::PushLiteral).lit(m_a_lit);
    asm.op(Opcode::SetProperty).lit(m);
    asm.ext(ExtOpcode::FinalizeClass).lit(a);
    asm.op(Opcode::InitBinding).lit(a);

    // class B extends A
    asm.op(Opcode::CreateVarBinding).lit(b_name);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(b_name);
    asm.op(Opcode::PushLiteral).lit(a);
    asm.op(Opcode::PushLiteral).lit(ctor_b_lit);
    asm.ext(ExtOpcode::InitClass).byte(1);
    asm.op(Opcode::PushLiteral).lit(m_b_lit);
    asm.op(Opcode::SetProperty).lit(m);
    asm.ext(ExtOpcode::FinalizeClass).lit(b_name);
    asm.op(Opcode::InitBinding).lit(b_name);

    // new B().m()
    asm.op(Opcode::PushLiteral).lit(b_name);
    asm.op(Opcode::New0Push);
    asm.op(Opcode::PushLiteral).lit(m_str);
    asm.op(Opcode::CallProp0Block);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(12));
}

// class C extends A {} — the implicit derived constructor forwards to A.
#[test]
fn implicit_derived_constructor_calls_super() {
    // A's constructor: this.v = 1
    let mut cab = CodeUnitBuilder::new(0, 0);
    let v_name = cab.string("v");
    let mut ca = Asm::new();
    ca.ext(ExtOpcode::ResolveLexicalThis);
    ca.op(Opcode::PushLiteral).lit(v_name);
    ca.op(Opcode::PushPosByte).byte(1);
    ca.op(Opcode::Assign);
    ca.op(Opcode::PushUndefined);
    ca.op(Opcode::Return);
    let ctor_a = cab
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(ca.finish());

    let mut b = CodeUnitBuilder::new(0, 0);
    let a = b.ident("A");
    let c = b.ident("C");
    let v_str = b.string("v");
    let ctor_a_lit = b.function(ctor_a);

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(a);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(a);
    asm.op(Opcode::PushLiteral).lit(ctor_a_lit);
    asm.ext(ExtOpcode::InitClass).byte(0);
    asm.ext(ExtOpcode::FinalizeClass).lit(a);
    asm.op(Opcode::InitBinding).lit(a);

    asm.op(Opcode::CreateVarBinding).lit(c);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(c);
    asm.op(Opcode::PushLiteral).lit(a);
    asm.ext(ExtOpcode::PushImplicitCtor).byte(1);
    asm.ext(ExtOpcode::InitClass).byte(1);
    asm.ext(ExtOpcode::FinalizeClass).lit(c);
    asm.op(Opcode::InitBinding).lit(c);

    // new C().v  → 1
    asm.op(Opcode::PushLiteral).lit(c);
    asm.op(Opcode::New0Push);
    asm.op(Opcode::PushLiteral).lit(v_str);
    asm.op(Opcode::PropGet);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(1));
}

// Static members land on the constructor, not the prototype.
#[test]
fn static_members_attach_to_the_constructor() {
    let mut sb = CodeUnitBuilder::new(0, 0);
    let mut sasm = Asm::new();
    sasm.op(Opcode::PushPosByte).byte(7);
    sasm.op(Opcode::Return);
    let s_fn = sb
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .finish(sasm.finish());

    let mut b = CodeUnitBuilder::new(0, 0);
    let a = b.ident("A");
    let s = b.ident("s");
    let s_str = b.string("s");
    let s_lit = b.function(s_fn);

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(a);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(a);
    asm.ext(ExtOpcode::PushImplicitCtor).byte(0);
    asm.ext(ExtOpcode::InitClass).byte(0);
    asm.op(Opcode::PushLiteral).lit(s_lit);
    asm.ext(ExtOpcode::SetStaticProperty).lit(s);
    asm.ext(ExtOpcode::FinalizeClass).lit(a);
    asm.op(Opcode::InitBinding).lit(a);

    // A.s()
    asm.op(Opcode::PushLiteral).lit(a);
    asm.op(Opcode::PushLiteral).lit(s_str);
    asm.op(Opcode::CallProp0Block);
    asm.op(Opcode::ReturnWithBlock);

    assert_eq!(run(b.finish(asm.finish())).unwrap(), Value::Int(7));
}

// Class constructors reject plain calls.
#[test]
fn class_constructor_requires_new() {
    let mut b = CodeUnitBuilder::new(0, 0);
    let a = b.ident("A");

    let mut asm = Asm::new();
    asm.op(Opcode::CreateVarBinding).lit(a);
    asm.ext(ExtOpcode::PushClassEnvironment).lit(a);
    asm.ext(ExtOpcode::PushImplicitCtor).byte(0);
    asm.ext(ExtOpcode::InitClass).byte(0);
    asm.ext(ExtOpcode::FinalizeClass).lit(a);
    asm.op(Opcode::InitBinding).lit(a);

    asm.op(Opcode::PushLiteral).lit(a);
    asm.op(Opcode::Call0Push);
    asm.op(Opcode::PopBlock);
    asm.op(Opcode::ReturnWithBlock);

    let mut vm = Interpreter::new();
    let err = run_in(&mut vm, b.finish(asm.finish())).unwrap_err();
    assert_eq!(uncaught_kind(&vm, &err), Some(ErrorKind::Type));
}
