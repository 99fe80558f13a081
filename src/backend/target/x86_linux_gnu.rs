use core::fmt::Write;
use std::collections::BTreeMap;

use crate::{
    backend::{
        regalloc::{allocate_registers, Allocation, Register},
        CodegenOptions,
    },
    index::Index,
    middle::ir::{
        BinaryOp, BlockId, Function, IcmpPredicate, InstrId, InstructionKind, Module, Type, Value,
    },
    middle::ir::pretty_print::{format_instruction, FunctionNames},
};

/// Lowers the IR to 32-bit x86 in AT&T syntax for the GNU assembler.
///
/// All locals live in the `%ebp` frame: the incoming cdecl argument at
/// `8(%ebp)`, allocas and spill slots at negative offsets. `%eax` is the
/// scratch and return register; `%ebx`/`%ecx`/`%edx` hold the allocated
/// values. Calls go through the PLT and follow cdecl (caller pops the
/// argument).
pub struct CodeGeneratorX86LinuxGnu;

impl super::CodeGenerator for CodeGeneratorX86LinuxGnu {
    fn translate_to_asm(&self, module: &Module, options: &CodegenOptions) -> String {
        let mut output = String::new();

        writeln!(&mut output, "\t.file \"{}\"", module.source_name).unwrap();
        writeln!(&mut output, "\t.text").unwrap();

        let mut label_base = 0;

        for (counter, function) in module.functions.iter().enumerate() {
            output.push_str(&codegen_function(function, counter, label_base, options));
            label_base += function.blocks.len();
        }

        output
    }
}

/// The incoming argument's cdecl home: above the return address
const ARGUMENT_OFFSET: i32 = 8;

/// The conditional jump matching each compare predicate
fn predicate_jump(pred: IcmpPredicate) -> &'static str {
    match pred {
        IcmpPredicate::Eq => "je",
        IcmpPredicate::Ne => "jne",
        IcmpPredicate::Sgt => "jg",
        IcmpPredicate::Sge => "jge",
        IcmpPredicate::Slt => "jl",
        IcmpPredicate::Sle => "jle",
    }
}

struct FunctionCodegen<'f> {
    function: &'f Function,
    allocation: Allocation,
    /// Stack frame offset of every alloca and spill slot
    offsets: BTreeMap<InstrId, i32>,
    /// Frame bytes to reserve below any saved callee-saved register
    frame_size: i32,
    label_base: usize,
}

fn codegen_function(
    function: &Function,
    counter: usize,
    label_base: usize,
    options: &CodegenOptions,
) -> String {
    let allocation = allocate_registers(function);
    let (offsets, frame_size) = assign_offsets(function, &allocation);

    let ctx = FunctionCodegen {
        function,
        allocation,
        offsets,
        frame_size,
        label_base,
    };

    ctx.emit_function(counter, options)
}

/// Builds the offset map: the alloca holding the incoming argument maps
/// to its caller-provided slot, every other alloca and every spill slot
/// gets the next 4-byte slot below the frame pointer (after a 4-byte
/// reservation for `%ebx` when the prologue saves it).
fn assign_offsets(
    function: &Function,
    allocation: &Allocation,
) -> (BTreeMap<InstrId, i32>, i32) {
    let argument_slot = function.linked_instructions().find_map(|id| {
        match function.instruction(id).kind {
            InstructionKind::Store {
                value: Value::Parameter,
                ptr,
            } => Some(ptr),
            _ => None,
        }
    });

    let mut offsets = BTreeMap::new();
    let mut local_bytes = if allocation.used_callee_saved { 4 } else { 0 };

    for id in function.linked_instructions() {
        let needs_slot = matches!(function.instruction(id).kind, InstructionKind::Alloca { .. })
            || allocation.is_spilled(id);

        if !needs_slot {
            continue;
        }

        if argument_slot == Some(id) {
            offsets.insert(id, ARGUMENT_OFFSET);
            continue;
        }

        local_bytes += 4;
        offsets.insert(id, -local_bytes);
    }

    let frame_size = local_bytes - if allocation.used_callee_saved { 4 } else { 0 };

    (offsets, frame_size)
}

impl<'f> FunctionCodegen<'f> {
    fn label(&self, block: BlockId) -> String {
        format!(".L{}", self.label_base + block.index())
    }

    /// The operand form of a value: an immediate, a register, or an
    /// `%ebp`-relative memory slot
    fn operand(&self, value: Value) -> String {
        match value {
            Value::Constant(constant) => format!("${constant}"),
            Value::Parameter => format!("{ARGUMENT_OFFSET}(%ebp)"),
            Value::Instruction(id) => {
                if let Some(register) = self.allocation.register_of(id) {
                    format!("%{}", register.name())
                } else if let Some(offset) = self.offsets.get(&id) {
                    format!("{offset}(%ebp)")
                } else {
                    unreachable!("value has neither a register nor a stack slot")
                }
            }
        }
    }

    fn is_in_memory(&self, value: Value) -> bool {
        match value {
            Value::Constant(_) => false,
            Value::Parameter => true,
            Value::Instruction(id) => self.allocation.register_of(id).is_none(),
        }
    }

    fn slot(&self, ptr: InstrId) -> i32 {
        self.offsets[&ptr]
    }

    fn emit_function(&self, counter: usize, options: &CodegenOptions) -> String {
        let names = FunctionNames::new(self.function);
        let mut output = String::new();

        macro_rules! emit {
            ($($arg:tt)*) => {
                writeln!(&mut output, $($arg)*).unwrap();
            };
        }

        /* Prologue */

        emit!("\t.globl {}", self.function.name);
        emit!("\t.type {}, @function", self.function.name);
        emit!("{}:", self.function.name);
        emit!(".LFB{counter}:");
        emit!("\tpushl %ebp");
        emit!("\tmovl %esp, %ebp");

        if self.allocation.used_callee_saved {
            emit!("\tpushl %ebx");
        }

        emit!("\tsubl ${}, %esp", self.frame_size);

        /* Blocks */

        for block in self.function.blocks.iter() {
            emit!("{}:", self.label(block.id));

            for id in &block.instructions {
                if matches!(
                    self.function.instruction(*id).kind,
                    InstructionKind::Alloca { .. }
                ) {
                    continue;
                }

                if options.emit_debug_info {
                    emit!(
                        "\t# {}",
                        strip_ansi_escapes::strip_str(format_instruction(
                            self.function,
                            &names,
                            *id
                        ))
                    );
                }

                output.push_str(&self.emit_instruction(*id));
            }
        }

        /* Epilogue */

        // Each `ret` emits its epilogue inline; close the function here
        // only when the final block falls off the end without one
        let last_ends_in_ret = self
            .function
            .blocks
            .iter()
            .last()
            .and_then(|block| block.instructions.last())
            .is_some_and(|id| {
                matches!(
                    self.function.instruction(*id).kind,
                    InstructionKind::Ret { .. }
                )
            });

        if !last_ends_in_ret {
            self.emit_epilogue(&mut output);
        }

        output
    }

    fn emit_epilogue(&self, output: &mut String) {
        if self.allocation.used_callee_saved {
            writeln!(output, "\tmovl -4(%ebp), %ebx").unwrap();
        }

        writeln!(output, "\tleave").unwrap();
        writeln!(output, "\tret").unwrap();
    }

    fn emit_instruction(&self, id: InstrId) -> String {
        let mut output = String::new();

        macro_rules! emit {
            ($($arg:tt)*) => {
                writeln!(&mut output, $($arg)*).unwrap();
            };
        }

        let instruction = self.function.instruction(id);

        match &instruction.kind {
            InstructionKind::Alloca { .. } => {
                unreachable!("allocas are frame slots, not emitted instructions")
            }
            InstructionKind::Ret { value } => {
                emit!("\tmovl {}, %eax", self.operand(*value));
                self.emit_epilogue(&mut output);
            }
            InstructionKind::Load { ptr } => {
                let slot = self.slot(*ptr);

                if let Some(register) = self.allocation.register_of(id) {
                    emit!("\tmovl {slot}(%ebp), %{}", register.name());
                } else {
                    emit!("\tmovl {slot}(%ebp), %eax");
                    emit!("\tmovl %eax, {}(%ebp)", self.offsets[&id]);
                }
            }
            InstructionKind::Store { value, ptr } => {
                // The incoming argument already lives in its slot
                if *value == Value::Parameter {
                    return output;
                }

                let slot = self.slot(*ptr);

                if self.is_in_memory(*value) {
                    emit!("\tmovl {}, %eax", self.operand(*value));
                    emit!("\tmovl %eax, {slot}(%ebp)");
                } else {
                    emit!("\tmovl {}, {slot}(%ebp)", self.operand(*value));
                }
            }
            InstructionKind::Binary {
                op: op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul),
                lhs,
                rhs,
            } => {
                let opcode = match op {
                    BinaryOp::Add => "addl",
                    BinaryOp::Sub => "subl",
                    BinaryOp::Mul => "imull",
                    BinaryOp::UDiv => unreachable!(),
                };

                let destination = self
                    .allocation
                    .register_of(id)
                    .map(|r| format!("%{}", r.name()))
                    .unwrap_or_else(|| "%eax".to_string());

                emit!("\tmovl {}, {destination}", self.operand(*lhs));
                emit!("\t{opcode} {}, {destination}", self.operand(*rhs));

                if self.allocation.register_of(id).is_none() {
                    emit!("\tmovl %eax, {}(%ebp)", self.offsets[&id]);
                }
            }
            InstructionKind::Binary {
                op: BinaryOp::UDiv,
                lhs,
                rhs,
            } => {
                self.emit_division(&mut output, id, *lhs, *rhs);
            }
            InstructionKind::Icmp { lhs, rhs, .. } => {
                // The compare leaves its verdict in the flags for the
                // conditional branch that follows; nothing is stored
                let destination = self
                    .allocation
                    .register_of(id)
                    .map(|r| format!("%{}", r.name()))
                    .unwrap_or_else(|| "%eax".to_string());

                emit!("\tmovl {}, {destination}", self.operand(*lhs));
                emit!("\tcmpl {}, {destination}", self.operand(*rhs));
            }
            InstructionKind::Call { callee, argument } => {
                emit!("\tpushl %ebx");
                emit!("\tpushl %ecx");
                emit!("\tpushl %edx");

                if let Some(argument) = argument {
                    emit!("\tpushl {}", self.operand(*argument));
                }

                emit!("\tcall {callee}@PLT");

                if argument.is_some() {
                    emit!("\taddl $4, %esp");
                }

                emit!("\tpopl %edx");
                emit!("\tpopl %ecx");
                emit!("\tpopl %ebx");

                if instruction.ty == Type::I32 {
                    if let Some(register) = self.allocation.register_of(id) {
                        emit!("\tmovl %eax, %{}", register.name());
                    } else if let Some(offset) = self.offsets.get(&id) {
                        emit!("\tmovl %eax, {offset}(%ebp)");
                    }
                }
            }
            InstructionKind::Br { target } => {
                emit!("\tjmp {}", self.label(*target));
            }
            InstructionKind::CondBr {
                condition,
                positive,
                negative,
            } => match condition {
                // A branch on a folded constant goes one way
                Value::Constant(constant) => {
                    let target = if *constant != 0 { positive } else { negative };
                    emit!("\tjmp {}", self.label(*target));
                }
                Value::Instruction(condition)
                    if matches!(
                        self.function.instruction(*condition).kind,
                        InstructionKind::Icmp { .. }
                    ) =>
                {
                    let InstructionKind::Icmp { pred, .. } =
                        self.function.instruction(*condition).kind
                    else {
                        unreachable!()
                    };

                    emit!("\t{} {}", predicate_jump(pred), self.label(*positive));
                    emit!("\tjmp {}", self.label(*negative));
                }
                _ => {
                    // A condition that is not the preceding compare (only
                    // reachable from hand-written textual IR)
                    emit!("\tmovl {}, %eax", self.operand(*condition));
                    emit!("\ttestl %eax, %eax");
                    emit!("\tjne {}", self.label(*positive));
                    emit!("\tjmp {}", self.label(*negative));
                }
            },
        }

        output
    }

    /// `udiv` lowering: unsigned divide with `%edx:%eax` as the dividend.
    /// `%edx` is allocatable, so it is preserved around the divide; an
    /// immediate divisor (or a divisor living in `%edx`) is read from the
    /// stack because `divl` takes no immediate operand.
    fn emit_division(&self, output: &mut String, id: InstrId, lhs: Value, rhs: Value) {
        macro_rules! emit {
            ($($arg:tt)*) => {
                writeln!(output, $($arg)*).unwrap()
            };
        }

        let destination = self.allocation.register_of(id);
        let pushed_constant = matches!(rhs, Value::Constant(_));

        emit!("\tpushl %edx");

        if let Value::Constant(constant) = rhs {
            emit!("\tpushl ${constant}");
        }

        emit!("\tmovl {}, %eax", self.operand(lhs));
        emit!("\txorl %edx, %edx");

        let divisor = match rhs {
            Value::Constant(_) => "(%esp)".to_string(),
            value if self.is_in_memory(value) => self.operand(value),
            Value::Instruction(divisor)
                if self.allocation.register_of(divisor) == Some(Register::Edx) =>
            {
                // The divisor's register was just zeroed; use the saved copy
                "(%esp)".to_string()
            }
            value => self.operand(value),
        };

        emit!("\tdivl {divisor}");

        if pushed_constant {
            emit!("\taddl $4, %esp");
        }

        if destination == Some(Register::Edx) {
            emit!("\tmovl %eax, %edx");
            emit!("\taddl $4, %esp");
        } else {
            match destination {
                Some(register) => emit!("\tmovl %eax, %{}", register.name()),
                None => emit!("\tmovl %eax, {}(%ebp)", self.offsets[&id]),
            }
            emit!("\tpopl %edx");
        }
    }
}
