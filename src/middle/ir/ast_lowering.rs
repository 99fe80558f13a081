//! Lowers the MiniC AST into the memory-form IR.
//!
//! Every variable gets an `alloca` slot and is read and written through
//! `load`/`store`; control structures are flattened into blocks and
//! branches. On a semantically valid AST the lowering never fails,
//! although the result can still fail verification when a source path
//! reaches the end of the function without returning.

use std::collections::BTreeMap;

use crate::frontend::{
    ast::{
        BinaryOperatorKind, Block, Expression, ExpressionKind, Program, RelationalOperatorKind,
        Statement, StatementKind, UnaryOperatorKind,
    },
    intern::InternedSymbol,
    SourceFileOrigin,
};
use crate::middle::ir::{
    BinaryOp, BlockId, Function, IcmpPredicate, InstrId, InstructionKind, Module, Type, Value,
};

use super::ExternalFunction;

struct LoweringContext {
    function: Function,
    /// The current insertion block
    cur: BlockId,
    /// Maps variable names to their alloca slot. The map is flat: an
    /// inner redeclaration rebinds the name for the rest of the function,
    /// matching the reference front end.
    symbol_table: BTreeMap<InternedSymbol, InstrId>,
}

pub fn lower_to_ir(program: &Program) -> Module {
    let source_name = match &program.source_file.origin {
        SourceFileOrigin::Memory => "<memory>".to_string(),
        SourceFileOrigin::File(path) => path.to_string_lossy().to_string(),
    };

    let declarations = [&program.ext1, &program.ext2]
        .into_iter()
        .map(|ext| declare_external(ext.name.symbol))
        .collect();

    let function = lower_function(program);

    Module {
        source_name,
        target_triple: "x86_64-pc-linux-gnu".to_string(),
        declarations,
        functions: vec![function],
    }
}

fn declare_external(name: InternedSymbol) -> ExternalFunction {
    // `print` takes one integer and returns nothing; any other external
    // is shaped like `read`
    if name.value() == "print" {
        ExternalFunction {
            name,
            return_type: Type::Void,
            param_types: vec![Type::I32],
        }
    } else {
        ExternalFunction {
            name,
            return_type: Type::I32,
            param_types: Vec::new(),
        }
    }
}

fn lower_function(program: &Program) -> Function {
    let definition = &program.function;
    let param_name = definition.parameter.as_ref().map(|p| p.symbol);

    let mut ctx = LoweringContext {
        function: Function::new(definition.name.symbol, param_name),
        cur: BlockId::ZERO,
        symbol_table: BTreeMap::new(),
    };

    let entry = ctx.function.create_block();
    ctx.cur = entry;

    // The incoming argument is stored into its own slot right away so
    // that the body can treat the parameter like any other variable
    if let Some(name) = param_name {
        let slot = ctx.emit(
            InstructionKind::Alloca {
                name: InternedSymbol::new(&format!("{name}.addr")),
            },
            Type::Ptr,
        );
        ctx.emit(
            InstructionKind::Store {
                value: Value::Parameter,
                ptr: slot,
            },
            Type::Void,
        );
        ctx.symbol_table.insert(name, slot);
    }

    ctx.lower_block(&definition.body);

    ctx.function
}

impl LoweringContext {
    fn emit(&mut self, kind: InstructionKind, ty: Type) -> InstrId {
        self.function.append_instruction(self.cur, kind, ty)
    }

    fn emit_in(&mut self, block: BlockId, kind: InstructionKind, ty: Type) -> InstrId {
        self.function.append_instruction(block, kind, ty)
    }

    fn lower_block(&mut self, block: &Block) {
        for statement in &block.statements {
            // Appending to a terminated block is forbidden. Statements
            // after a `return` are still lowered faithfully, into a fresh
            // block that nothing branches to.
            if self.function.is_terminated(self.cur) {
                self.cur = self.function.create_block();
            }

            self.lower_statement(statement);
        }
    }

    fn lower_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Declaration(name) => {
                let slot = self.emit(
                    InstructionKind::Alloca { name: name.symbol },
                    Type::Ptr,
                );
                self.symbol_table.insert(name.symbol, slot);
            }
            StatementKind::Assignment { target, value } => {
                let value = self.lower_expression(value);
                let ptr = self.symbol_table[&target.symbol];
                self.emit(InstructionKind::Store { value, ptr }, Type::Void);
            }
            StatementKind::Return(expression) => {
                let value = self.lower_expression(expression);
                self.emit(InstructionKind::Ret { value }, Type::Void);
            }
            StatementKind::Call { callee, argument } => {
                let argument = argument.as_ref().map(|a| self.lower_expression(a));
                let ty = if callee.symbol.value() == "read" {
                    Type::I32
                } else {
                    Type::Void
                };

                self.emit(
                    InstructionKind::Call {
                        callee: callee.symbol,
                        argument,
                    },
                    ty,
                );
            }
            StatementKind::Block(block) => self.lower_block(block),
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.lower_if(condition, then_branch, else_branch.as_deref()),
            StatementKind::While { condition, body } => self.lower_while(condition, body),
        }
    }

    /// Produces the single-entry single-exit region for `if`/`else`.
    ///
    /// The bodies are lowered before the condition so that blocks appear
    /// in the order: predecessor, then-blocks, else-blocks, exit.
    fn lower_if(
        &mut self,
        condition: &Expression,
        then_branch: &Statement,
        else_branch: Option<&Statement>,
    ) {
        let pred = self.cur;

        let then_block = self.function.create_block();
        self.cur = then_block;
        self.lower_statement(then_branch);
        let last_then = self.cur;

        let else_block = else_branch.map(|else_branch| {
            let else_block = self.function.create_block();
            self.cur = else_block;
            self.lower_statement(else_branch);
            (else_block, self.cur)
        });

        // The condition is evaluated in the predecessor, after the
        // bodies were built
        self.cur = pred;
        let condition = self.lower_expression(condition);

        let exit = self.function.create_block();

        let negative = else_block.map(|(block, _)| block).unwrap_or(exit);
        self.emit_in(
            pred,
            InstructionKind::CondBr {
                condition,
                positive: then_block,
                negative,
            },
            Type::Void,
        );

        if !self.function.is_terminated(last_then) {
            self.emit_in(last_then, InstructionKind::Br { target: exit }, Type::Void);
        }

        if let Some((_, last_else)) = else_block {
            if !self.function.is_terminated(last_else) {
                self.emit_in(last_else, InstructionKind::Br { target: exit }, Type::Void);
            }
        }

        self.cur = exit;
    }

    fn lower_while(&mut self, condition: &Expression, body: &Statement) {
        let header = self.function.create_block();
        self.emit(InstructionKind::Br { target: header }, Type::Void);

        let body_block = self.function.create_block();
        self.cur = body_block;
        self.lower_statement(body);
        if !self.function.is_terminated(self.cur) {
            self.emit(InstructionKind::Br { target: header }, Type::Void);
        }

        let after = self.function.create_block();
        self.cur = header;
        let condition = self.lower_expression(condition);
        self.emit(
            InstructionKind::CondBr {
                condition,
                positive: body_block,
                negative: after,
            },
            Type::Void,
        );

        self.cur = after;
    }

    fn lower_expression(&mut self, expression: &Expression) -> Value {
        match &expression.kind {
            ExpressionKind::Constant(value) => Value::Constant(*value),
            ExpressionKind::Variable(name) => {
                let ptr = self.symbol_table[&name.symbol];
                Value::Instruction(self.emit(InstructionKind::Load { ptr }, Type::I32))
            }
            ExpressionKind::Call { callee, argument } => {
                let argument = argument.as_ref().map(|a| self.lower_expression(a));

                Value::Instruction(self.emit(
                    InstructionKind::Call {
                        callee: callee.symbol,
                        argument,
                    },
                    Type::I32,
                ))
            }
            ExpressionKind::Binary { operator, lhs, rhs } => {
                let lhs = self.lower_expression(lhs);
                let rhs = self.lower_expression(rhs);

                let op = match operator.kind {
                    BinaryOperatorKind::Add => BinaryOp::Add,
                    BinaryOperatorKind::Subtract => BinaryOp::Sub,
                    BinaryOperatorKind::Multiply => BinaryOp::Mul,
                    BinaryOperatorKind::Divide => BinaryOp::UDiv,
                };

                Value::Instruction(self.emit(
                    InstructionKind::Binary { op, lhs, rhs },
                    Type::I32,
                ))
            }
            ExpressionKind::Unary { operator, operand } => {
                let UnaryOperatorKind::Negate = operator.kind;
                let operand = self.lower_expression(operand);

                // Negation is subtraction from zero
                Value::Instruction(self.emit(
                    InstructionKind::Binary {
                        op: BinaryOp::Sub,
                        lhs: Value::Constant(0),
                        rhs: operand,
                    },
                    Type::I32,
                ))
            }
            ExpressionKind::Relational { operator, lhs, rhs } => {
                let lhs = self.lower_expression(lhs);
                let rhs = self.lower_expression(rhs);

                let pred = match operator.kind {
                    RelationalOperatorKind::LessThan => IcmpPredicate::Slt,
                    RelationalOperatorKind::GreaterThan => IcmpPredicate::Sgt,
                    RelationalOperatorKind::LessThanOrEqualTo => IcmpPredicate::Sle,
                    RelationalOperatorKind::GreaterThanOrEqualTo => IcmpPredicate::Sge,
                    RelationalOperatorKind::Equals => IcmpPredicate::Eq,
                    RelationalOperatorKind::NotEquals => IcmpPredicate::Ne,
                };

                Value::Instruction(self.emit(
                    InstructionKind::Icmp { pred, lhs, rhs },
                    Type::I1,
                ))
            }
        }
    }
}
