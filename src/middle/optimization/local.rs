//! The per-block passes: constant folding, common subexpression
//! elimination, and dead code elimination.

use hashbrown::HashMap;

use crate::middle::ir::{
    BinaryOp, BlockId, Function, IcmpPredicate, InstrId, InstructionKind, Value,
};

/// Replaces every arithmetic/compare instruction whose operands are all
/// integer constants with the folded constant (two's-complement 32-bit
/// arithmetic). The folded instruction is left in place for dead code
/// elimination to erase.
pub fn fold_constants(function: &mut Function, block: BlockId) -> bool {
    let mut changed = false;

    for id in function.blocks[block].instructions.clone() {
        let folded = match function.instruction(id).kind {
            InstructionKind::Binary {
                op,
                lhs: Value::Constant(lhs),
                rhs: Value::Constant(rhs),
            } => match op {
                BinaryOp::Add => lhs.wrapping_add(rhs),
                BinaryOp::Sub => lhs.wrapping_sub(rhs),
                BinaryOp::Mul => lhs.wrapping_mul(rhs),
                // Division is not folded
                BinaryOp::UDiv => continue,
            },
            InstructionKind::Icmp {
                pred,
                lhs: Value::Constant(lhs),
                rhs: Value::Constant(rhs),
            } => {
                let result = match pred {
                    IcmpPredicate::Slt => lhs < rhs,
                    IcmpPredicate::Sgt => lhs > rhs,
                    IcmpPredicate::Sle => lhs <= rhs,
                    IcmpPredicate::Sge => lhs >= rhs,
                    IcmpPredicate::Eq => lhs == rhs,
                    IcmpPredicate::Ne => lhs != rhs,
                };

                result as i32
            }
            _ => continue,
        };

        function.replace_all_uses_with(id, Value::Constant(folded));
        changed = true;
    }

    changed
}

/// The opcode bucket an instruction is CSE'd within. Instructions with
/// side effects (stores, calls, terminators) and allocas (whose value
/// identity is their purpose) are never candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CseKey {
    Load,
    Binary(BinaryOp),
    Icmp(IcmpPredicate),
}

fn cse_key(kind: &InstructionKind) -> Option<CseKey> {
    match kind {
        InstructionKind::Load { .. } => Some(CseKey::Load),
        InstructionKind::Binary { op, .. } => Some(CseKey::Binary(*op)),
        InstructionKind::Icmp { pred, .. } => Some(CseKey::Icmp(*pred)),
        _ => None,
    }
}

/// Redirects each instruction that recomputes an earlier, still-used
/// instruction of the same opcode with identical operands. A pair of
/// loads is only merged when no intervening store writes their cell, so
/// the pass stays safe without any cross-block reasoning.
pub fn eliminate_common_subexpressions(function: &mut Function, block: BlockId) -> bool {
    let mut changed = false;
    let mut prior: HashMap<CseKey, Vec<InstrId>> = HashMap::new();

    for id in function.blocks[block].instructions.clone() {
        let Some(key) = cse_key(&function.instruction(id).kind) else {
            continue;
        };

        for prev in prior.get(&key).cloned().unwrap_or_default() {
            if !function.has_users(prev) || !equivalent(function, prev, id) {
                continue;
            }

            if matches!(function.instruction(id).kind, InstructionKind::Load { .. })
                && !safe_to_merge_loads(function, block, prev, id)
            {
                continue;
            }

            function.replace_all_uses_with(id, Value::Instruction(prev));
            changed = true;
            break;
        }

        prior.entry(key).or_default().push(id);
    }

    changed
}

fn equivalent(function: &Function, a: InstrId, b: InstrId) -> bool {
    let a = function.instruction(a);
    let b = function.instruction(b);

    a.ty == b.ty && a.kind.operands() == b.kind.operands()
}

/// Scans forward from the earlier load up to (but not including) the
/// later one; merging is unsafe if any intervening store writes the
/// loads' cell.
fn safe_to_merge_loads(
    function: &Function,
    block: BlockId,
    earlier: InstrId,
    later: InstrId,
) -> bool {
    let InstructionKind::Load { ptr } = function.instruction(earlier).kind else {
        unreachable!("load safety check on a non-load instruction");
    };

    let instructions = &function.blocks[block].instructions;
    let start = instructions.iter().position(|i| *i == earlier).unwrap();
    let end = instructions.iter().position(|i| *i == later).unwrap();

    for id in &instructions[start + 1..end] {
        if let InstructionKind::Store { ptr: store_ptr, .. } = function.instruction(*id).kind {
            if store_ptr == ptr {
                return false;
            }
        }
    }

    true
}

/// Erases every instruction with no users and no side effects. Stores,
/// terminators, and calls always survive (calls conservatively, even
/// though `read` is pure).
pub fn eliminate_dead_code(function: &mut Function, block: BlockId) -> bool {
    let mut to_erase = Vec::new();

    for id in function.blocks[block].instructions.clone() {
        if !function.instruction(id).kind.has_side_effects() && !function.has_users(id) {
            to_erase.push(id);
        }
    }

    for id in &to_erase {
        function.erase_instruction(*id);
    }

    !to_erase.is_empty()
}
