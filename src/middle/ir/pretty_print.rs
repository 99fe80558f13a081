//! Textual IR output following LLVM's conventions.
//!
//! One renderer produces colored lines for the console; the plain
//! serialization written to `.ll` files (and embedded as assembly
//! comments) is the same text with the color escapes stripped.

use std::collections::BTreeMap;

use colored::Colorize;
use itertools::Itertools;

use crate::index::Index;
use crate::middle::ir::{
    BinaryOp, BlockId, Function, IcmpPredicate, InstrId, InstructionKind, Module, Type, Value,
};

/// Printable names for every value in one function: allocas keep their
/// variable name (disambiguated when shadowing reuses one), temporaries
/// are numbered in order of appearance.
pub struct FunctionNames {
    names: BTreeMap<InstrId, String>,
    param: String,
}

impl FunctionNames {
    pub fn new(function: &Function) -> Self {
        let param = function
            .param_name
            .map(|name| name.to_string())
            .unwrap_or_else(|| "arg".to_string());

        let mut used = vec![param.clone()];
        let mut names = BTreeMap::new();
        let mut next_temp = 0usize;

        for id in function.linked_instructions() {
            match &function.instruction(id).kind {
                InstructionKind::Alloca { name } => {
                    let base = name.value();
                    let mut candidate = base.to_string();
                    let mut suffix = 0usize;

                    while used.contains(&candidate) {
                        suffix += 1;
                        candidate = format!("{base}{suffix}");
                    }

                    used.push(candidate.clone());
                    names.insert(id, candidate);
                }
                _ if function.produces_value(id) => {
                    names.insert(id, next_temp.to_string());
                    next_temp += 1;
                }
                _ => {}
            }
        }

        Self { names, param }
    }

    fn name_of(&self, id: InstrId) -> &str {
        self.names
            .get(&id)
            .map(|s| s.as_str())
            .unwrap_or("<unnamed>")
    }
}

pub fn block_label(block: BlockId) -> String {
    format!("bb{}", block.index())
}

pub fn type_str(ty: Type) -> &'static str {
    match ty {
        Type::I32 => "i32",
        Type::I1 => "i1",
        Type::Ptr => "ptr",
        Type::Void => "void",
    }
}

fn binary_op_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::UDiv => "udiv",
    }
}

pub fn predicate_str(pred: IcmpPredicate) -> &'static str {
    match pred {
        IcmpPredicate::Slt => "slt",
        IcmpPredicate::Sgt => "sgt",
        IcmpPredicate::Sle => "sle",
        IcmpPredicate::Sge => "sge",
        IcmpPredicate::Eq => "eq",
        IcmpPredicate::Ne => "ne",
    }
}

fn format_value(names: &FunctionNames, value: Value) -> String {
    match value {
        Value::Constant(c) => c.to_string().purple().to_string(),
        Value::Parameter => format!("%{}", names.param).yellow().to_string(),
        Value::Instruction(id) => format!("%{}", names.name_of(id)).yellow().to_string(),
    }
}

fn format_label(block: BlockId) -> String {
    format!("%{}", block_label(block)).blue().to_string()
}

/// Renders a single instruction as one (colored) line of textual IR
pub fn format_instruction(function: &Function, names: &FunctionNames, id: InstrId) -> String {
    let instruction = function.instruction(id);
    let value = |v: Value| format_value(names, v);
    let result = |id: InstrId| {
        format!(
            "{} {} ",
            format!("%{}", names.name_of(id)).yellow(),
            "=".white()
        )
    };

    match &instruction.kind {
        InstructionKind::Alloca { .. } => {
            format!("{}{} i32, align 4", result(id), "alloca".cyan())
        }
        InstructionKind::Load { ptr } => {
            format!(
                "{}{} i32, ptr {}",
                result(id),
                "load".cyan(),
                format!("%{}", names.name_of(*ptr)).yellow()
            )
        }
        InstructionKind::Store { value: v, ptr } => {
            format!(
                "{} i32 {}, ptr {}",
                "store".cyan(),
                value(*v),
                format!("%{}", names.name_of(*ptr)).yellow()
            )
        }
        InstructionKind::Binary { op, lhs, rhs } => {
            format!(
                "{}{} i32 {}, {}",
                result(id),
                binary_op_str(*op).cyan(),
                value(*lhs),
                value(*rhs)
            )
        }
        InstructionKind::Icmp { pred, lhs, rhs } => {
            format!(
                "{}{} {} i32 {}, {}",
                result(id),
                "icmp".cyan(),
                predicate_str(*pred),
                value(*lhs),
                value(*rhs)
            )
        }
        InstructionKind::Call { callee, argument } => {
            let arguments = argument
                .iter()
                .map(|a| format!("i32 {}", value(*a)))
                .join(", ");
            let call = format!(
                "{} {} @{}({})",
                "call".cyan(),
                type_str(instruction.ty),
                callee,
                arguments
            );

            if instruction.ty == Type::Void {
                call
            } else {
                format!("{}{}", result(id), call)
            }
        }
        InstructionKind::Br { target } => {
            format!("{} label {}", "br".cyan(), format_label(*target))
        }
        InstructionKind::CondBr {
            condition,
            positive,
            negative,
        } => {
            format!(
                "{} i1 {}, label {}, label {}",
                "br".cyan(),
                value(*condition),
                format_label(*positive),
                format_label(*negative)
            )
        }
        InstructionKind::Ret { value: v } => {
            format!("{} i32 {}", "ret".cyan(), value(*v))
        }
    }
}

fn render_function(function: &Function) -> String {
    let names = FunctionNames::new(function);

    let mut output = String::new();

    output.push_str(&format!(
        "{} i32 {}(i32 {}) {{\n",
        "define".magenta(),
        format!("@{}", function.name).blue(),
        format!("%{}", names.param).yellow()
    ));

    for block in function.blocks.iter() {
        if block.id != BlockId::ZERO {
            output.push('\n');
        }

        output.push_str(&format!(
            "{}\n",
            format!("{}:", block_label(block.id)).bright_red()
        ));

        for id in &block.instructions {
            output.push_str("  ");
            output.push_str(&format_instruction(function, &names, *id));
            output.push('\n');
        }
    }

    output.push_str("}\n");
    output
}

fn render_module(module: &Module) -> String {
    let mut output = String::new();

    output.push_str(&format!("; ModuleID = '{}'\n", module.source_name));
    output.push_str(&format!("source_filename = \"{}\"\n", module.source_name));
    output.push_str(&format!("target triple = \"{}\"\n", module.target_triple));
    output.push('\n');

    for declaration in &module.declarations {
        let params = declaration.param_types.iter().map(|ty| type_str(*ty)).join(", ");
        output.push_str(&format!(
            "{} {} @{}({})\n",
            "declare".magenta(),
            type_str(declaration.return_type),
            declaration.name,
            params
        ));
    }

    for function in &module.functions {
        output.push('\n');
        output.push_str(&render_function(function));
    }

    output
}

/// Serializes the module as plain textual IR, the format consumed by
/// `ir::parse` and written to `.ll` files
pub fn write_module(module: &Module) -> String {
    strip_ansi_escapes::strip_str(render_module(module))
}

/// Prints the module to stdout with syntax colors
pub fn pretty_print_module(module: &Module) {
    print!("{}", render_module(module));
}
