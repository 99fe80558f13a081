//! The intermediate representation: a control-flow graph of typed
//! three-address instructions in memory form.
//!
//! Every local variable is an `alloca` slot; reads are `load`s and writes
//! are `store`s, and no phi nodes are ever introduced. Blocks and
//! instructions are arena-allocated inside their function and referenced
//! by stable indices, so the graph can contain cycles (loop headers) and
//! the optimizer can erase instructions without invalidating identities.

use std::collections::BTreeMap;

use crate::{
    frontend::intern::InternedSymbol,
    index::IndexVec,
    simple_index,
};

pub mod ast_lowering;
pub mod parse;
pub mod pretty_print;

simple_index! {
    /// Identifies a basic block within a function
    pub struct BlockId;
}

impl BlockId {
    pub const ZERO: Self = Self(0);
}

simple_index! {
    /// Identifies an instruction within a function's arena.
    ///
    /// Instruction slots are never reused, so an `InstrId` stays valid as
    /// a value identity until the instruction is erased from its block.
    pub struct InstrId;
}

#[derive(Debug)]
pub struct Module {
    /// Name of the source file this module was generated from
    pub source_name: String,
    pub target_triple: String,
    pub declarations: Vec<ExternalFunction>,
    pub functions: Vec<Function>,
}

impl Module {
    /// Looks up an external declaration by name
    pub fn declaration(&self, name: InternedSymbol) -> Option<&ExternalFunction> {
        self.declarations.iter().find(|d| d.name == name)
    }
}

/// A function declared here but defined externally and resolved at link
/// time (`print` and `read`)
#[derive(Debug)]
pub struct ExternalFunction {
    pub name: InternedSymbol,
    pub return_type: Type,
    pub param_types: Vec<Type>,
}

#[derive(Debug)]
pub struct Function {
    pub name: InternedSymbol,
    pub return_type: Type,
    pub param_types: Vec<Type>,
    /// Source name of the parameter, if the function declares one
    pub param_name: Option<InternedSymbol>,
    pub blocks: IndexVec<BlockId, BasicBlock>,
    /// Arena holding every instruction ever created for this function.
    /// Erased instructions stay in the arena but are unlinked from their
    /// block, which removes them from all traversals.
    pub instructions: IndexVec<InstrId, Instruction>,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Instructions in program order; the last one is the terminator
    pub instructions: Vec<InstrId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    /// The type of the value this instruction produces (`Void` if none)
    pub ty: Type,
    pub block: BlockId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    I32,
    I1,
    Ptr,
    Void,
}

/// An instruction operand: a constant, the function parameter, or a
/// reference to the value produced by another instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Constant(i32),
    Parameter,
    Instruction(InstrId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// A 4-byte stack slot for one i32 variable. The name is the source
    /// variable the slot was created for.
    Alloca { name: InternedSymbol },
    Load {
        ptr: InstrId,
    },
    Store {
        value: Value,
        ptr: InstrId,
    },
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Icmp {
        pred: IcmpPredicate,
        lhs: Value,
        rhs: Value,
    },
    Call {
        callee: InternedSymbol,
        argument: Option<Value>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        condition: Value,
        positive: BlockId,
        negative: BlockId,
    },
    Ret {
        value: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpPredicate {
    Slt,
    Sgt,
    Sle,
    Sge,
    Eq,
    Ne,
}

impl InstructionKind {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Br { .. } | Self::CondBr { .. } | Self::Ret { .. })
    }

    /// Whether erasing this instruction would change observable behavior.
    /// Calls are retained conservatively even though `read` is pure.
    pub fn has_side_effects(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Call { .. }) || self.is_terminator()
    }

    /// The operands of this instruction as plain values. Block labels are
    /// not operands in this sense.
    pub fn operands(&self) -> Vec<Value> {
        match *self {
            Self::Alloca { .. } | Self::Br { .. } => Vec::new(),
            Self::Load { ptr } => vec![Value::Instruction(ptr)],
            Self::Store { value, ptr } => vec![value, Value::Instruction(ptr)],
            Self::Binary { lhs, rhs, .. } | Self::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Call { argument, .. } => argument.into_iter().collect(),
            Self::CondBr { condition, .. } => vec![condition],
            Self::Ret { value } => vec![value],
        }
    }

    /// Rewrites every operand equal to `from` into `to`
    pub fn replace_operand(&mut self, from: InstrId, to: Value) {
        let rewrite = |value: &mut Value| {
            if *value == Value::Instruction(from) {
                *value = to;
            }
        };

        match self {
            Self::Alloca { .. } | Self::Br { .. } => {}
            Self::Load { .. } => {
                // A load's pointer is always an alloca, and allocas are
                // never replaced (their identity is their purpose)
            }
            Self::Store { value, .. } => rewrite(value),
            Self::Binary { lhs, rhs, .. } | Self::Icmp { lhs, rhs, .. } => {
                rewrite(lhs);
                rewrite(rhs);
            }
            Self::Call { argument, .. } => {
                if let Some(argument) = argument {
                    rewrite(argument);
                }
            }
            Self::CondBr { condition, .. } => rewrite(condition),
            Self::Ret { value } => rewrite(value),
        }
    }
}

impl Function {
    pub fn new(name: InternedSymbol, param_name: Option<InternedSymbol>) -> Self {
        Self {
            name,
            return_type: Type::I32,
            param_types: vec![Type::I32],
            param_name,
            blocks: IndexVec::new(),
            instructions: IndexVec::new(),
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = self.blocks.next_index();
        self.blocks.push(BasicBlock {
            id,
            instructions: Vec::new(),
        })
    }

    /// Appends a new instruction to the given block and returns its id
    pub fn append_instruction(
        &mut self,
        block: BlockId,
        kind: InstructionKind,
        ty: Type,
    ) -> InstrId {
        let id = self.instructions.push(Instruction { kind, ty, block });
        self.blocks[block].instructions.push(id);
        id
    }

    pub fn instruction(&self, id: InstrId) -> &Instruction {
        &self.instructions[id]
    }

    /// Whether the block already ends in a terminator
    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.blocks[block]
            .instructions
            .last()
            .is_some_and(|id| self.instructions[*id].kind.is_terminator())
    }

    /// The block's terminator, if it has one
    pub fn terminator(&self, block: BlockId) -> Option<InstrId> {
        self.blocks[block]
            .instructions
            .last()
            .copied()
            .filter(|id| self.instructions[*id].kind.is_terminator())
    }

    /// Whether the instruction produces a value other instructions can use
    pub fn produces_value(&self, id: InstrId) -> bool {
        self.instructions[id].ty != Type::Void
    }

    /// Whether any linked instruction uses the value of `id`
    pub fn has_users(&self, id: InstrId) -> bool {
        self.linked_instructions()
            .any(|user| self.instructions[user].kind.operands().contains(&Value::Instruction(id)))
    }

    /// All instructions currently linked into a block, in block order
    pub fn linked_instructions(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter().copied())
    }

    /// Redirects every use of `victim` to `replacement`, leaving the
    /// victim disconnected (to be erased later). Implemented as a full
    /// rescan of the function's linked instructions.
    pub fn replace_all_uses_with(&mut self, victim: InstrId, replacement: Value) {
        let users = self.linked_instructions().collect::<Vec<_>>();

        for user in users {
            self.instructions[user].kind.replace_operand(victim, replacement);
        }
    }

    /// Unlinks the instruction from its block, invalidating its identity
    pub fn erase_instruction(&mut self, id: InstrId) {
        let block = self.instructions[id].block;
        self.blocks[block].instructions.retain(|i| *i != id);
    }

    /// The CFG successors of a block, read off its terminator
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        match self.terminator(block).map(|id| &self.instructions[id].kind) {
            Some(InstructionKind::Br { target }) => vec![*target],
            Some(InstructionKind::CondBr {
                positive, negative, ..
            }) => vec![*positive, *negative],
            _ => Vec::new(),
        }
    }

    /// Predecessor map for every block in the function
    pub fn predecessors(&self) -> BTreeMap<BlockId, Vec<BlockId>> {
        let mut predecessors: BTreeMap<BlockId, Vec<BlockId>> =
            self.blocks.indices().map(|id| (id, Vec::new())).collect();

        for block in self.blocks.indices() {
            for successor in self.successors(block) {
                predecessors.get_mut(&successor).unwrap().push(block);
            }
        }

        predecessors
    }
}

/// A malformed function discovered during IR verification. Producing one
/// of these from a well-formed AST is a compiler bug; they surface when
/// the source reaches the end of a path without returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrError {
    pub function: InternedSymbol,
    pub message: String,
}

impl core::fmt::Display for IrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid IR in function '{}': {}", self.function, self.message)
    }
}

/// Checks the structural invariants of the module: every block ends in
/// exactly one terminator and nothing follows it.
pub fn verify_module(module: &Module) -> Result<(), IrError> {
    for function in &module.functions {
        for block in function.blocks.iter() {
            let error = |message: String| IrError {
                function: function.name,
                message,
            };

            match block.instructions.last() {
                Some(last) if function.instructions[*last].kind.is_terminator() => {}
                _ => {
                    return Err(error(format!(
                        "block bb{} does not end in a terminator",
                        crate::index::Index::index(block.id)
                    )))
                }
            }

            for id in &block.instructions[..block.instructions.len() - 1] {
                if function.instructions[*id].kind.is_terminator() {
                    return Err(error(format!(
                        "block bb{} has an instruction after its terminator",
                        crate::index::Index::index(block.id)
                    )));
                }
            }
        }
    }

    Ok(())
}
