//! Parser for the textual IR subset emitted by `pretty_print`.
//!
//! The textual format is the serialization contract between the pipeline
//! stages: the driver uses this parser to run the optimizer and backend
//! directly from an `.ll` file. Anything outside the subset this
//! compiler generates is a parse error.

use hashbrown::HashMap;

use crate::frontend::intern::InternedSymbol;
use crate::middle::ir::{
    BinaryOp, BlockId, ExternalFunction, Function, IcmpPredicate, InstrId, InstructionKind,
    Module, Type, Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrParseError {
    pub line: usize,
    pub message: String,
}

impl core::fmt::Display for IrParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IR parse error (line: {}): {}", self.line, self.message)
    }
}

/// Parses a textual IR module. `source_name` seeds the module name when
/// the text carries no `source_filename` line.
pub fn parse_module(text: &str, source_name: &str) -> Result<Module, IrParseError> {
    let mut module = Module {
        source_name: source_name.to_string(),
        target_triple: String::new(),
        declarations: Vec::new(),
        functions: Vec::new(),
    };

    let lines = text.lines().collect::<Vec<_>>();
    let mut index = 0usize;

    while index < lines.len() {
        let line = lines[index].trim();
        let line_number = index + 1;
        index += 1;

        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("source_filename = ") {
            module.source_name = parse_quoted(rest, line_number)?;
            continue;
        }

        if let Some(rest) = line.strip_prefix("target triple = ") {
            module.target_triple = parse_quoted(rest, line_number)?;
            continue;
        }

        if let Some(rest) = line.strip_prefix("declare ") {
            module.declarations.push(parse_declare(rest, line_number)?);
            continue;
        }

        if let Some(rest) = line.strip_prefix("define ") {
            // Collect the body up to the closing brace
            let body_start = index;
            while index < lines.len() && lines[index].trim() != "}" {
                index += 1;
            }

            if index == lines.len() {
                return Err(error(line_number, "unterminated function body"));
            }

            let function = parse_function(rest, &lines[body_start..index], body_start, line_number)?;
            module.functions.push(function);

            index += 1; // consume the closing brace
            continue;
        }

        return Err(error(line_number, &format!("unexpected line: {line}")));
    }

    Ok(module)
}

fn error(line: usize, message: &str) -> IrParseError {
    IrParseError {
        line,
        message: message.to_string(),
    }
}

fn parse_quoted(text: &str, line: usize) -> Result<String, IrParseError> {
    let trimmed = text.trim();

    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(|s| s.to_string())
        .ok_or_else(|| error(line, "expected a quoted string"))
}

fn parse_type(text: &str, line: usize) -> Result<Type, IrParseError> {
    match text {
        "i32" => Ok(Type::I32),
        "i1" => Ok(Type::I1),
        "ptr" => Ok(Type::Ptr),
        "void" => Ok(Type::Void),
        _ => Err(error(line, &format!("unknown type: {text}"))),
    }
}

/// `void @print(i32)` or `i32 @read()`
fn parse_declare(rest: &str, line: usize) -> Result<ExternalFunction, IrParseError> {
    let (return_type, rest) = rest
        .split_once(' ')
        .ok_or_else(|| error(line, "malformed declare"))?;
    let return_type = parse_type(return_type, line)?;

    let (name, params) = parse_global_call_shape(rest, line)?;

    let param_types = if params.is_empty() {
        Vec::new()
    } else {
        params
            .split(',')
            .map(|p| parse_type(p.trim(), line))
            .collect::<Result<_, _>>()?
    };

    Ok(ExternalFunction {
        name,
        return_type,
        param_types,
    })
}

/// Splits `@name(args…)` into the name and the raw argument text
fn parse_global_call_shape(
    text: &str,
    line: usize,
) -> Result<(InternedSymbol, String), IrParseError> {
    let text = text.trim();
    let name_start = text
        .strip_prefix('@')
        .ok_or_else(|| error(line, "expected a @-prefixed global name"))?;

    let open = name_start
        .find('(')
        .ok_or_else(|| error(line, "expected an argument list"))?;
    let close = name_start
        .rfind(')')
        .ok_or_else(|| error(line, "unterminated argument list"))?;

    let name = InternedSymbol::new(&name_start[..open]);
    let arguments = name_start[open + 1..close].to_string();

    Ok((name, arguments))
}

struct FunctionParser {
    function: Function,
    /// Maps `%name` (without the sigil) to the value it denotes
    values: HashMap<String, Value>,
    /// Maps label names to their block
    labels: HashMap<String, BlockId>,
}

/// `rest` is the define line after the keyword, e.g. `i32 @f(i32 %x) {`;
/// `body` holds the lines between the braces.
fn parse_function(
    rest: &str,
    body: &[&str],
    body_start: usize,
    define_line: usize,
) -> Result<Function, IrParseError> {
    let rest = rest
        .trim()
        .strip_suffix('{')
        .ok_or_else(|| error(define_line, "expected `{` at end of define"))?
        .trim();

    let (return_type, rest) = rest
        .split_once(' ')
        .ok_or_else(|| error(define_line, "malformed define"))?;
    parse_type(return_type, define_line)?;

    let (name, params) = parse_global_call_shape(rest, define_line)?;

    // `i32 %x` or a bare `i32` for an unnamed parameter
    let param_name = match params.trim().split_whitespace().collect::<Vec<_>>()[..] {
        ["i32", name] => Some(strip_sigil(name, define_line)?),
        ["i32"] | [] => None,
        _ => return Err(error(define_line, "malformed parameter list")),
    };

    let mut parser = FunctionParser {
        function: Function::new(name, param_name.map(InternedSymbol::new)),
        values: HashMap::new(),
        labels: HashMap::new(),
    };

    if let Some(param) = param_name {
        parser.values.insert(param.to_string(), Value::Parameter);
    }

    // First pass: collect the labels so branches can reference blocks
    // that appear later in the text
    for (offset, line) in body.iter().enumerate() {
        let line = line.trim();

        if let Some(label) = line.strip_suffix(':') {
            let block = parser.function.create_block();
            if parser.labels.insert(label.to_string(), block).is_some() {
                return Err(error(
                    body_start + offset + 1,
                    &format!("duplicate label: {label}"),
                ));
            }
        }
    }

    // Second pass: parse the instructions into their blocks
    let mut current_block = None;

    for (offset, line) in body.iter().enumerate() {
        let line = line.trim();
        let line_number = body_start + offset + 1;

        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if let Some(label) = line.strip_suffix(':') {
            current_block = Some(parser.labels[label]);
            continue;
        }

        let block = current_block
            .ok_or_else(|| error(line_number, "instruction before the first label"))?;

        parser.parse_instruction(block, line, line_number)?;
    }

    Ok(parser.function)
}

fn strip_sigil<'a>(text: &'a str, line: usize) -> Result<&'a str, IrParseError> {
    text.strip_prefix('%')
        .ok_or_else(|| error(line, &format!("expected a %-prefixed name: {text}")))
}

impl FunctionParser {
    fn parse_instruction(
        &mut self,
        block: BlockId,
        line: &str,
        line_number: usize,
    ) -> Result<(), IrParseError> {
        // `%dst = <instruction>` or a bare instruction
        let (destination, rest) = match line.split_once(" = ") {
            Some((dst, rest)) if dst.starts_with('%') => {
                (Some(strip_sigil(dst.trim(), line_number)?), rest.trim())
            }
            _ => (None, line),
        };

        let (opcode, operands) = rest.split_once(' ').unwrap_or((rest, ""));
        let operands = operands.trim();

        let id = match opcode {
            "alloca" => {
                let name = destination
                    .ok_or_else(|| error(line_number, "alloca requires a destination"))?;

                self.append(
                    block,
                    InstructionKind::Alloca {
                        name: InternedSymbol::new(name),
                    },
                    Type::Ptr,
                )
            }
            "load" => {
                // `i32, ptr %a`
                let ptr = operands
                    .strip_prefix("i32, ptr ")
                    .ok_or_else(|| error(line_number, "malformed load"))?;
                let ptr = self.lookup_pointer(ptr, line_number)?;

                self.append(block, InstructionKind::Load { ptr }, Type::I32)
            }
            "store" => {
                // `i32 <value>, ptr %a`
                let rest = operands
                    .strip_prefix("i32 ")
                    .ok_or_else(|| error(line_number, "malformed store"))?;
                let (value, ptr) = rest
                    .split_once(", ptr ")
                    .ok_or_else(|| error(line_number, "malformed store"))?;

                let value = self.parse_value(value.trim(), line_number)?;
                let ptr = self.lookup_pointer(ptr.trim(), line_number)?;

                self.append(block, InstructionKind::Store { value, ptr }, Type::Void)
            }
            "add" | "sub" | "mul" | "udiv" => {
                let op = match opcode {
                    "add" => BinaryOp::Add,
                    "sub" => BinaryOp::Sub,
                    "mul" => BinaryOp::Mul,
                    _ => BinaryOp::UDiv,
                };

                let (lhs, rhs) = self.parse_value_pair(operands, "i32 ", line_number)?;

                self.append(block, InstructionKind::Binary { op, lhs, rhs }, Type::I32)
            }
            "icmp" => {
                // `<pred> i32 <lhs>, <rhs>`
                let (pred, rest) = operands
                    .split_once(' ')
                    .ok_or_else(|| error(line_number, "malformed icmp"))?;

                let pred = match pred {
                    "slt" => IcmpPredicate::Slt,
                    "sgt" => IcmpPredicate::Sgt,
                    "sle" => IcmpPredicate::Sle,
                    "sge" => IcmpPredicate::Sge,
                    "eq" => IcmpPredicate::Eq,
                    "ne" => IcmpPredicate::Ne,
                    _ => return Err(error(line_number, &format!("unknown predicate: {pred}"))),
                };

                let (lhs, rhs) = self.parse_value_pair(rest.trim(), "i32 ", line_number)?;

                self.append(block, InstructionKind::Icmp { pred, lhs, rhs }, Type::I1)
            }
            "call" => {
                // `<ty> @callee(i32 <arg>?)`
                let (ty, rest) = operands
                    .split_once(' ')
                    .ok_or_else(|| error(line_number, "malformed call"))?;
                let ty = parse_type(ty, line_number)?;

                let (callee, arguments) = parse_global_call_shape(rest, line_number)?;

                let argument = if arguments.trim().is_empty() {
                    None
                } else {
                    let argument = arguments
                        .trim()
                        .strip_prefix("i32 ")
                        .ok_or_else(|| error(line_number, "malformed call argument"))?;
                    Some(self.parse_value(argument.trim(), line_number)?)
                };

                self.append(block, InstructionKind::Call { callee, argument }, ty)
            }
            "br" => {
                if let Some(target) = operands.strip_prefix("label ") {
                    let target = self.lookup_label(target.trim(), line_number)?;
                    self.append(block, InstructionKind::Br { target }, Type::Void)
                } else {
                    // `i1 <cond>, label %a, label %b`
                    let rest = operands
                        .strip_prefix("i1 ")
                        .ok_or_else(|| error(line_number, "malformed branch"))?;
                    let (condition, rest) = rest
                        .split_once(", label ")
                        .ok_or_else(|| error(line_number, "malformed conditional branch"))?;
                    let (positive, negative) = rest
                        .split_once(", label ")
                        .ok_or_else(|| error(line_number, "malformed conditional branch"))?;

                    let condition = self.parse_value(condition.trim(), line_number)?;
                    let positive = self.lookup_label(positive.trim(), line_number)?;
                    let negative = self.lookup_label(negative.trim(), line_number)?;

                    self.append(
                        block,
                        InstructionKind::CondBr {
                            condition,
                            positive,
                            negative,
                        },
                        Type::Void,
                    )
                }
            }
            "ret" => {
                let value = operands
                    .strip_prefix("i32 ")
                    .ok_or_else(|| error(line_number, "malformed ret"))?;
                let value = self.parse_value(value.trim(), line_number)?;

                self.append(block, InstructionKind::Ret { value }, Type::Void)
            }
            _ => return Err(error(line_number, &format!("unknown opcode: {opcode}"))),
        };

        if let Some(destination) = destination {
            if self
                .values
                .insert(destination.to_string(), Value::Instruction(id))
                .is_some()
            {
                return Err(error(
                    line_number,
                    &format!("value %{destination} is defined twice"),
                ));
            }
        }

        Ok(())
    }

    fn append(&mut self, block: BlockId, kind: InstructionKind, ty: Type) -> InstrId {
        self.function.append_instruction(block, kind, ty)
    }

    /// `i32 <lhs>, <rhs>` with the given type prefix
    fn parse_value_pair(
        &self,
        text: &str,
        prefix: &str,
        line: usize,
    ) -> Result<(Value, Value), IrParseError> {
        let rest = text
            .strip_prefix(prefix)
            .ok_or_else(|| error(line, "expected i32 operands"))?;
        let (lhs, rhs) = rest
            .split_once(',')
            .ok_or_else(|| error(line, "expected two operands"))?;

        Ok((
            self.parse_value(lhs.trim(), line)?,
            self.parse_value(rhs.trim(), line)?,
        ))
    }

    fn parse_value(&self, text: &str, line: usize) -> Result<Value, IrParseError> {
        if let Some(name) = text.strip_prefix('%') {
            return self
                .values
                .get(name)
                .copied()
                .ok_or_else(|| error(line, &format!("unknown value: %{name}")));
        }

        text.parse::<i32>()
            .map(Value::Constant)
            .map_err(|_| error(line, &format!("malformed operand: {text}")))
    }

    /// Resolves a `%name` operand that must be an alloca slot
    fn lookup_pointer(&self, text: &str, line: usize) -> Result<InstrId, IrParseError> {
        let name = strip_sigil(text, line)?;

        match self.values.get(name) {
            Some(Value::Instruction(id))
                if matches!(
                    self.function.instruction(*id).kind,
                    InstructionKind::Alloca { .. }
                ) =>
            {
                Ok(*id)
            }
            Some(_) => Err(error(line, &format!("%{name} is not an alloca"))),
            None => Err(error(line, &format!("unknown pointer: %{name}"))),
        }
    }

    fn lookup_label(&self, text: &str, line: usize) -> Result<BlockId, IrParseError> {
        let name = strip_sigil(text, line)?;

        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| error(line, &format!("unknown label: %{name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parser::Parser, SourceFile, SourceFileOrigin};
    use crate::middle::ir::{ast_lowering::lower_to_ir, pretty_print::write_module, verify_module};

    fn lower(program: &str) -> Module {
        let source = SourceFile {
            contents: program.to_string(),
            origin: SourceFileOrigin::Memory,
        };
        let program = Parser::parse_program(&source).expect("test program should parse");
        lower_to_ir(&program)
    }

    fn assert_round_trips(program: &str) {
        let module = lower(program);
        let text = write_module(&module);

        let reparsed = parse_module(&text, "test").expect("emitted IR should parse");
        assert!(verify_module(&reparsed).is_ok());

        // Emitting the reparsed module must reproduce the text exactly
        assert_eq!(write_module(&reparsed), text);
    }

    #[test]
    fn round_trips_straight_line_code() {
        assert_round_trips(
            "extern void print(int); extern int read(); \
             int f(int x) { int a; a = x + 10; print(a); return a; }",
        );
    }

    #[test]
    fn round_trips_control_flow() {
        assert_round_trips(
            "extern void print(int); extern int read(); \
             int f(int x) { int i; int s; i = 0; s = 0; \
               while (i < x) { if (i > 2) { s = s + i; } else { s = s + 1; } i = i + 1; } \
               return s; }",
        );
    }

    #[test]
    fn round_trips_calls_and_division() {
        assert_round_trips(
            "extern void print(int); extern int read(); \
             int f(int x) { int v; v = read(); v = v / 2; print(v); read(); return -v; }",
        );
    }

    #[test]
    fn parses_declarations() {
        let module = lower(
            "extern void print(int); extern int read(); int f(int x) { return x; }",
        );
        let reparsed = parse_module(&write_module(&module), "test").unwrap();

        assert_eq!(reparsed.declarations.len(), 2);
        assert_eq!(reparsed.declarations[0].name.value(), "print");
        assert_eq!(reparsed.declarations[0].return_type, Type::Void);
        assert_eq!(reparsed.declarations[1].name.value(), "read");
        assert_eq!(reparsed.declarations[1].return_type, Type::I32);
    }

    #[test]
    fn rejects_unknown_opcode() {
        let text = "define i32 @f(i32 %x) {\nbb0:\n  frobnicate i32 %x\n}\n";
        let err = parse_module(text, "test").unwrap_err();
        assert!(err.message.contains("unknown opcode"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn rejects_reference_to_undefined_value() {
        let text = "define i32 @f(i32 %x) {\nbb0:\n  ret i32 %nope\n}\n";
        let err = parse_module(text, "test").unwrap_err();
        assert!(err.message.contains("unknown value"));
    }

    #[test]
    fn parses_forward_label_references() {
        let text = "define i32 @f(i32 %x) {\nbb0:\n  br label %bb1\n\nbb1:\n  ret i32 0\n}\n";
        let module = parse_module(text, "test").unwrap();

        assert!(verify_module(&module).is_ok());
        assert_eq!(module.functions[0].blocks.len(), 2);
    }
}
