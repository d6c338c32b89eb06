use std::rc::Rc;

use quill_asm::{Asm, CodeFlags, CodeUnit, CodeUnitBuilder, ExtOpcode, Opcode};

use super::Interpreter;
use crate::context::Context;
use crate::env;
use crate::heap::Heap;

#[cfg(feature = "lookup-cache")]
use crate::cache::LookupCache;

impl Interpreter {
    /// Fresh interpreter with an empty realm: a plain global object wrapped
    /// by the global object-bound environment.
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let global_object = heap.alloc_plain(None);
        let global_env = env::create_object_lex_env(&mut heap, None, global_object, false);

        Self {
            heap,
            context: Context::default(),
            global_object,
            global_env,
            #[cfg(feature = "lookup-cache")]
            cache: LookupCache::default(),
            implicit_ctor_base: Rc::new(implicit_ctor_base()),
            implicit_ctor_derived: Rc::new(implicit_ctor_derived()),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// `constructor(){}`
fn implicit_ctor_base() -> CodeUnit {
    let mut asm = Asm::new();
    asm.op(Opcode::PushUndefined).op(Opcode::Return);
    CodeUnitBuilder::new(0, 0)
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION)
        .stack_limit(2)
        .finish(asm.finish())
}

/// `constructor(...args){ super(...args) }`
fn implicit_ctor_derived() -> CodeUnit {
    let mut asm = Asm::new();
    asm.ext(ExtOpcode::PushSpreadElement);
    asm.op(Opcode::PushLiteral).lit(0);
    asm.ext(ExtOpcode::SpreadArguments).byte(2);
    asm.ext(ExtOpcode::SpreadSuperCall);
    asm.ext(ExtOpcode::ResolveLexicalThis);
    asm.op(Opcode::Return);
    CodeUnitBuilder::new(1, 1)
        .flags(CodeFlags::STRICT | CodeFlags::IS_FUNCTION | CodeFlags::REST_PARAMETER)
        .stack_limit(4)
        .finish(asm.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;

    #[test]
    fn realm_roots_are_linked() {
        let vm = Interpreter::new();
        let global_env = vm.global_env();
        match &vm.heap().get(global_env).kind {
            ObjectKind::Environment(record) => {
                assert!(record.outer.is_none());
                match record.kind {
                    crate::env::EnvKind::ObjectBound { object, with } => {
                        assert_eq!(object, vm.global_object());
                        assert!(!with);
                    }
                    _ => panic!("global environment must be object-bound"),
                }
            }
            _ => panic!("global environment must be an environment cell"),
        }
    }

    #[test]
    fn implicit_constructors_parse() {
        let vm = Interpreter::new();
        assert!(vm.implicit_ctor_base.code.len() >= 2);
        assert!(vm.implicit_ctor_derived.flags.contains(CodeFlags::REST_PARAMETER));
    }
}
