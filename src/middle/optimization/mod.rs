//! The optimizer: four passes iterated to a fixpoint.
//!
//! Each outer round runs the whole-function reaching-definitions
//! constant propagation, then the per-block local passes (constant
//! folding, common subexpression elimination, dead code elimination).
//! The loop repeats until a full round changes nothing. Every pass only
//! removes instructions or replaces uses with constants or earlier
//! values, so the instruction count never grows and the loop terminates.

use crate::middle::ir::{Function, Module};

pub mod constant_propagation;
pub mod local;

pub fn optimize_module(module: &mut Module) {
    for function in &mut module.functions {
        optimize_function(function);
    }
}

pub fn optimize_function(function: &mut Function) {
    let mut changed = true;

    while changed {
        changed = false;

        changed |= constant_propagation::propagate_constants(function);

        for block in function.blocks.indices().collect::<Vec<_>>() {
            changed |= local::fold_constants(function, block);
            changed |= local::eliminate_common_subexpressions(function, block);
            changed |= local::eliminate_dead_code(function, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parser::Parser, SourceFile, SourceFileOrigin};
    use crate::middle::ir::{
        ast_lowering::lower_to_ir, pretty_print::write_module, verify_module, InstructionKind,
        Module, Value,
    };

    fn optimized(body: &str) -> Module {
        let source = SourceFile {
            contents: format!(
                "extern void print(int); extern int read(); int f(int x) {body}"
            ),
            origin: SourceFileOrigin::Memory,
        };

        let program = Parser::parse_program(&source).expect("test program should parse");
        let mut module = lower_to_ir(&program);
        optimize_module(&mut module);

        assert!(verify_module(&module).is_ok());
        module
    }

    fn count_kind(module: &Module, predicate: impl Fn(&InstructionKind) -> bool) -> usize {
        let function = &module.functions[0];
        function
            .linked_instructions()
            .filter(|id| predicate(&function.instruction(*id).kind))
            .count()
    }

    #[test]
    fn folds_constant_expression_to_returned_constant() {
        // `a = 2 + 3; return a;` must collapse to `ret i32 5`
        let module = optimized("{ int a; a = 2 + 3; return a; }");

        assert_eq!(
            count_kind(&module, |k| matches!(k, InstructionKind::Binary { .. })),
            0
        );
        assert_eq!(
            count_kind(&module, |k| matches!(k, InstructionKind::Load { .. })),
            0
        );

        let function = &module.functions[0];
        let ret = function
            .linked_instructions()
            .find(|id| matches!(function.instruction(*id).kind, InstructionKind::Ret { .. }))
            .unwrap();
        assert_eq!(
            function.instruction(ret).kind,
            InstructionKind::Ret {
                value: Value::Constant(5)
            }
        );
    }

    #[test]
    fn cse_collapses_duplicate_multiplications() {
        // Both `x*10` computations must collapse into one multiply
        let module = optimized("{ int a; a = x * 10; int b; b = x * 10; return a + b; }");

        assert_eq!(
            count_kind(&module, |k| matches!(
                k,
                InstructionKind::Binary {
                    op: crate::middle::ir::BinaryOp::Mul,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn bare_read_call_survives_every_pass() {
        let module = optimized("{ read(); return 0; }");

        assert_eq!(
            count_kind(&module, |k| matches!(k, InstructionKind::Call { .. })),
            1
        );
    }

    #[test]
    fn propagates_constant_across_branches() {
        // Both arms store 7, so the load after the join must fold to 7
        let module = optimized(
            "{ int a; if (x > 0) { a = 7; } else { a = 7; } return a; }",
        );

        let function = &module.functions[0];
        let ret = function
            .linked_instructions()
            .find(|id| matches!(function.instruction(*id).kind, InstructionKind::Ret { .. }))
            .unwrap();
        assert_eq!(
            function.instruction(ret).kind,
            InstructionKind::Ret {
                value: Value::Constant(7)
            }
        );
    }

    #[test]
    fn does_not_propagate_differing_stores() {
        let module = optimized(
            "{ int a; if (x > 0) { a = 1; } else { a = 2; } return a; }",
        );

        // Two loads survive: `x` for the condition (its store writes the
        // argument, not a constant) and `a` after the join (the arms
        // store different constants)
        assert_eq!(
            count_kind(&module, |k| matches!(k, InstructionKind::Load { .. })),
            2
        );
    }

    #[test]
    fn loop_body_is_preserved() {
        let module = optimized(
            "{ int i; int s; i = 0; s = 0;
               while (i < x) { s = s + i; i = i + 1; }
               return s; }",
        );

        // The loop-carried variables cannot be constant-propagated away
        assert!(count_kind(&module, |k| matches!(k, InstructionKind::Binary { .. })) >= 2);
        assert!(count_kind(&module, |k| matches!(k, InstructionKind::CondBr { .. })) == 1);
    }

    #[test]
    fn optimizer_is_idempotent_at_fixpoint() {
        let source = SourceFile {
            contents: "extern void print(int); extern int read(); \
                       int f(int x) { int a; a = 2 + 3; print(a); return a * x; }"
                .to_string(),
            origin: SourceFileOrigin::Memory,
        };

        let program = Parser::parse_program(&source).unwrap();
        let mut module = lower_to_ir(&program);

        optimize_module(&mut module);
        let first = write_module(&module);

        optimize_module(&mut module);
        let second = write_module(&module);

        assert_eq!(first, second);
    }
}
