//! Declared-before-use analysis.
//!
//! MiniC has no types to check (every variable is an `i32`), so semantic
//! analysis reduces to verifying that each variable use is covered by a
//! declaration visible at that point. The analysis walks the AST with a
//! stack of scopes: one pushed per function (seeded with the parameter)
//! and one per block. Every offending use produces its own diagnostic,
//! and the walk never aborts early.

use std::collections::BTreeSet;

use super::{
    ast::{
        visit::{self, Visitor},
        Block, FunctionDefinition, Identifier, Program, Statement, StatementKind,
    },
    intern::InternedSymbol,
    lexer::Span,
};

/// A use of a variable name with no visible declaration
#[derive(Debug, Clone, Copy)]
pub struct SemanticError {
    pub name: InternedSymbol,
    pub span: Span,
}

impl core::fmt::Display for SemanticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error: undeclared variable '{}'", self.name)
    }
}

/// Checks that every variable in the program is declared before use and
/// returns one diagnostic per offending use (a name used N times yields
/// N diagnostics).
pub fn check_program(program: &Program) -> Vec<SemanticError> {
    let mut resolver = Resolver {
        scope_stack: Vec::new(),
        errors: Vec::new(),
    };

    resolver.visit_program(program);

    debug_assert!(resolver.scope_stack.is_empty());

    resolver.errors
}

struct Resolver {
    scope_stack: Vec<BTreeSet<InternedSymbol>>,
    errors: Vec<SemanticError>,
}

impl Resolver {
    fn declare(&mut self, name: &Identifier) {
        // Redeclaration in the same scope is idempotent: all MiniC
        // variables are i32, so the second declaration merges silently
        self.scope_stack
            .last_mut()
            .expect("scope stack should be nonempty while visiting statements")
            .insert(name.symbol);
    }

    fn check_use(&mut self, name: &Identifier) {
        let declared = self
            .scope_stack
            .iter()
            .any(|scope| scope.contains(&name.symbol));

        if !declared {
            self.errors.push(SemanticError {
                name: name.symbol,
                span: name.span,
            });
        }
    }
}

impl<'ast> Visitor<'ast> for Resolver {
    fn visit_function_definition(&mut self, function: &'ast FunctionDefinition) {
        // The function scope holds only the parameter; the body block
        // pushes its own scope for declarations
        let mut scope = BTreeSet::new();
        if let Some(parameter) = &function.parameter {
            scope.insert(parameter.symbol);
        }

        self.scope_stack.push(scope);
        self.visit_block(&function.body);
        self.scope_stack.pop();
    }

    fn visit_block(&mut self, block: &'ast Block) {
        self.scope_stack.push(BTreeSet::new());
        visit::walk_block(self, block);
        self.scope_stack.pop();
    }

    fn visit_statement(&mut self, statement: &'ast Statement) {
        match &statement.kind {
            StatementKind::Declaration(name) => self.declare(name),
            StatementKind::Assignment { target, value } => {
                self.check_use(target);
                self.visit_expression(value);
            }
            _ => visit::walk_statement(self, statement),
        }
    }

    fn visit_identifier(&mut self, identifier: &'ast Identifier) {
        // Reached for variable reads; call targets are never walked
        self.check_use(identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parser::Parser, SourceFile, SourceFileOrigin};

    fn check(body: &str) -> Vec<SemanticError> {
        let source = SourceFile {
            contents: format!(
                "extern void print(int); extern int read(); int f(int x) {body}"
            ),
            origin: SourceFileOrigin::Memory,
        };

        let program = Parser::parse_program(&source).expect("test program should parse");
        check_program(&program)
    }

    #[test]
    fn accepts_declared_variables() {
        let errors = check("{ int a; a = x + 1; print(a); return a; }");
        assert!(errors.is_empty());
    }

    #[test]
    fn reports_undeclared_variable() {
        let errors = check("{ return y; }");

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].name.value(), "y");
        assert_eq!(
            errors[0].to_string(),
            "Error: undeclared variable 'y'"
        );
    }

    #[test]
    fn reports_every_offending_use() {
        // `y` is used three times: assignment target, operand, return
        let errors = check("{ y = y + 1; return y; }");
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn parameter_is_visible_in_nested_blocks() {
        let errors = check("{ int a; a = 0; while (a < x) { a = a + x; } return a; }");
        assert!(errors.is_empty());
    }

    #[test]
    fn inner_declaration_is_not_visible_outside() {
        let errors = check("{ { int a; a = 1; } return a; }");

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].name.value(), "a");
    }

    #[test]
    fn inner_declaration_shadows_outer() {
        let errors = check("{ int a; a = 1; { int a; a = 2; } return a; }");
        assert!(errors.is_empty());
    }

    #[test]
    fn redeclaration_in_same_scope_is_accepted() {
        let errors = check("{ int a; int a; a = 1; return a; }");
        assert!(errors.is_empty());
    }

    #[test]
    fn call_target_is_not_a_variable_use() {
        let errors = check("{ int v; v = read(); print(v); return v; }");
        assert!(errors.is_empty());
    }
}
