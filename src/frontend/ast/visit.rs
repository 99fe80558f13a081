//! Trait definition for an AST visitor which walks the tree in DFS order

use super::{
    Block, Expression, ExpressionKind, ExternDecl, FunctionDefinition, Identifier, Program,
    Statement, StatementKind,
};

pub trait Visitor<'ast>: Sized {
    fn visit_program(&mut self, program: &'ast Program) {
        walk_program(self, program)
    }

    fn visit_extern_decl(&mut self, _extern_decl: &'ast ExternDecl) {}

    fn visit_function_definition(&mut self, function: &'ast FunctionDefinition) {
        walk_function_definition(self, function)
    }

    fn visit_identifier(&mut self, _identifier: &'ast Identifier) {}

    fn visit_block(&mut self, block: &'ast Block) {
        walk_block(self, block)
    }

    fn visit_statement(&mut self, statement: &'ast Statement) {
        walk_statement(self, statement)
    }

    fn visit_expression(&mut self, expression: &'ast Expression) {
        walk_expression(self, expression)
    }
}

pub fn walk_program<'a>(visitor: &mut impl Visitor<'a>, program: &'a Program) {
    visitor.visit_extern_decl(&program.ext1);
    visitor.visit_extern_decl(&program.ext2);
    visitor.visit_function_definition(&program.function);
}

pub fn walk_function_definition<'a>(
    visitor: &mut impl Visitor<'a>,
    function: &'a FunctionDefinition,
) {
    visitor.visit_identifier(&function.name);

    if let Some(parameter) = &function.parameter {
        visitor.visit_identifier(parameter);
    }

    visitor.visit_block(&function.body);
}

pub fn walk_block<'a>(visitor: &mut impl Visitor<'a>, block: &'a Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_statement<'a>(visitor: &mut impl Visitor<'a>, statement: &'a Statement) {
    match &statement.kind {
        StatementKind::Declaration(name) => visitor.visit_identifier(name),
        StatementKind::Assignment { target, value } => {
            visitor.visit_identifier(target);
            visitor.visit_expression(value);
        }
        StatementKind::Return(expression) => visitor.visit_expression(expression),
        StatementKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(then_branch);

            if let Some(else_branch) = else_branch {
                visitor.visit_statement(else_branch);
            }
        }
        StatementKind::While { condition, body } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(body);
        }
        StatementKind::Call { argument, .. } => {
            if let Some(argument) = argument {
                visitor.visit_expression(argument);
            }
        }
        StatementKind::Block(block) => visitor.visit_block(block),
    }
}

pub fn walk_expression<'a>(visitor: &mut impl Visitor<'a>, expression: &'a Expression) {
    match &expression.kind {
        ExpressionKind::Variable(identifier) => visitor.visit_identifier(identifier),
        ExpressionKind::Constant(_) => {}
        ExpressionKind::Call { argument, .. } => {
            if let Some(argument) = argument {
                visitor.visit_expression(argument);
            }
        }
        ExpressionKind::Binary { lhs, rhs, .. } | ExpressionKind::Relational { lhs, rhs, .. } => {
            visitor.visit_expression(lhs);
            visitor.visit_expression(rhs);
        }
        ExpressionKind::Unary { operand, .. } => visitor.visit_expression(operand),
    }
}
