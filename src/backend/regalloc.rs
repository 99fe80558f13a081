//! Per-basic-block linear-scan register allocation.
//!
//! Three registers are allocatable (`ebx`, `ecx`, `edx`); `eax` is
//! reserved as the code generator's scratch and return register. Values
//! that do not fit are assigned a `Spill` stack slot, as are values whose
//! uses escape their defining block (allocas and cross-block values are
//! handled as memory). Within a block the scan walks instructions in
//! order, reusing a dying left operand's register for two-operand
//! arithmetic and evicting the active value with the fewest remaining
//! uses under pressure.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::middle::ir::{BinaryOp, BlockId, Function, InstrId, InstructionKind, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Register {
    Ebx,
    Ecx,
    Edx,
}

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::Ebx => "ebx",
            Register::Ecx => "ecx",
            Register::Edx => "edx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(Register),
    /// A stack slot, assigned an offset by the code generator
    Spill,
}

#[derive(Debug, Default)]
pub struct Allocation {
    pub locations: BTreeMap<InstrId, Location>,
    /// Whether `ebx` was ever allocated; the code generator saves it in
    /// the prologue when set
    pub used_callee_saved: bool,
}

impl Allocation {
    pub fn register_of(&self, id: InstrId) -> Option<Register> {
        match self.locations.get(&id) {
            Some(Location::Register(register)) => Some(*register),
            _ => None,
        }
    }

    pub fn is_spilled(&self, id: InstrId) -> bool {
        matches!(self.locations.get(&id), Some(Location::Spill))
    }
}

pub fn allocate_registers(function: &Function) -> Allocation {
    let mut allocation = Allocation::default();

    // Values used outside their defining block live in memory
    for id in function.linked_instructions() {
        if !function.produces_value(id)
            || matches!(function.instruction(id).kind, InstructionKind::Alloca { .. })
        {
            continue;
        }

        let block = function.instruction(id).block;
        let escapes = function.linked_instructions().any(|user| {
            function.instruction(user).block != block
                && function
                    .instruction(user)
                    .kind
                    .operands()
                    .contains(&Value::Instruction(id))
        });

        if escapes {
            allocation.locations.insert(id, Location::Spill);
        }
    }

    for block in function.blocks.indices() {
        allocate_block(function, block, &mut allocation);
    }

    allocation
}

/// Local live ranges: for each value first produced in the block, the
/// sorted instruction indices at which it is defined or used
fn block_live_ranges(
    function: &Function,
    index: &[InstrId],
    allocation: &Allocation,
) -> HashMap<InstrId, Vec<usize>> {
    let mut live: HashMap<InstrId, Vec<usize>> = HashMap::new();

    for (i, id) in index.iter().enumerate() {
        if function.produces_value(*id) && !allocation.is_spilled(*id) {
            live.entry(*id).or_default().push(i);
        }

        for operand in function.instruction(*id).kind.operands() {
            if let Value::Instruction(operand) = operand {
                if let Some(range) = live.get_mut(&operand) {
                    range.push(i);
                }
            }
        }
    }

    live
}

fn allocate_block(function: &Function, block: BlockId, allocation: &mut Allocation) {
    // Allocas are memory, not values to allocate
    let index = function.blocks[block]
        .instructions
        .iter()
        .copied()
        .filter(|id| !matches!(function.instruction(*id).kind, InstructionKind::Alloca { .. }))
        .collect::<Vec<_>>();

    let live = block_live_ranges(function, &index, allocation);

    // `ebx` is popped last so the callee-saved register is only touched
    // under pressure
    let mut available = vec![Register::Ebx, Register::Edx, Register::Ecx];
    let mut active: BTreeMap<Register, InstrId> = BTreeMap::new();
    let mut assigned: HashMap<InstrId, Register> = HashMap::new();

    let remaining_uses = |live: &HashMap<InstrId, Vec<usize>>, value: InstrId, i: usize| {
        live.get(&value)
            .map(|range| range.iter().filter(|n| **n > i).count())
            .unwrap_or(0)
    };

    for (i, id) in index.iter().copied().enumerate() {
        let dies_here = |value: InstrId| {
            live.get(&value)
                .is_some_and(|range| range.last() == Some(&i))
        };

        if live.contains_key(&id) {
            // Two-operand reuse: when the left operand of an arithmetic
            // instruction dies here and holds a register, the result
            // takes that register over
            let reused = match function.instruction(id).kind {
                InstructionKind::Binary {
                    op: BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul,
                    lhs: Value::Instruction(lhs),
                    ..
                } if dies_here(lhs) => match assigned.get(&lhs).copied() {
                    Some(register) if active.get(&register).copied() == Some(lhs) => {
                        active.insert(register, id);
                        assigned.insert(id, register);
                        true
                    }
                    _ => false,
                },
                _ => false,
            };

            if !reused {
                if let Some(register) = available.pop() {
                    active.insert(register, id);
                    assigned.insert(id, register);
                } else {
                    // Evict the active value with the fewest remaining
                    // uses, unless the new value has even fewer
                    let (victim_register, victim) = active
                        .iter()
                        .map(|(r, v)| (*r, *v))
                        .min_by_key(|(_, v)| remaining_uses(&live, *v, i))
                        .expect("no registers available implies some value is active");

                    if remaining_uses(&live, victim, i) < remaining_uses(&live, id, i) {
                        allocation.locations.insert(victim, Location::Spill);
                        active.insert(victim_register, id);
                        assigned.insert(id, victim_register);
                    } else {
                        allocation.locations.insert(id, Location::Spill);
                    }
                }
            }
        }

        // Release registers whose value's live range ends here (the
        // result itself included, when nothing ever uses it)
        let mut ending = function
            .instruction(id)
            .kind
            .operands()
            .into_iter()
            .filter_map(|operand| match operand {
                Value::Instruction(operand) => Some(operand),
                _ => None,
            })
            .collect::<Vec<_>>();
        ending.push(id);

        for value in ending {
            if !dies_here(value) {
                continue;
            }

            if let Some(register) = assigned.get(&value).copied() {
                if active.get(&register).copied() == Some(value) {
                    active.remove(&register);
                    available.push(register);
                }
            }
        }
    }

    if assigned.values().any(|r| *r == Register::Ebx) {
        allocation.used_callee_saved = true;
    }

    for (id, register) in assigned {
        // Values evicted mid-scan already hold a Spill location
        allocation
            .locations
            .entry(id)
            .or_insert(Location::Register(register));
    }
}
