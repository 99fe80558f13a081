//! Whole-function constant propagation built on reaching definitions.
//!
//! A definition is a store instruction; its cell is the alloca it writes.
//! Classic gen/kill sets feed a forward may-reach fixpoint over the CFG,
//! and a rewrite phase then replaces each load whose every reaching store
//! writes one identical constant.

use hashbrown::{HashMap, HashSet};

use crate::middle::ir::{BlockId, Function, InstrId, InstructionKind, Value};

pub fn propagate_constants(function: &mut Function) -> bool {
    let stores_by_cell = build_store_map(function);
    let (gen_sets, kill_sets) = build_gen_and_kill_sets(function, &stores_by_cell);
    let in_sets = build_in_sets(function, &gen_sets, &kill_sets);

    rewrite_loads(function, &stores_by_cell, &in_sets)
}

/// The cell a store writes
fn cell_of(function: &Function, store: InstrId) -> InstrId {
    match function.instruction(store).kind {
        InstructionKind::Store { ptr, .. } => ptr,
        _ => unreachable!("only stores are definitions"),
    }
}

/// Groups every store in the function by the cell it writes
fn build_store_map(function: &Function) -> HashMap<InstrId, Vec<InstrId>> {
    let mut stores_by_cell: HashMap<InstrId, Vec<InstrId>> = HashMap::new();

    for id in function.linked_instructions() {
        if let InstructionKind::Store { ptr, .. } = function.instruction(id).kind {
            stores_by_cell.entry(ptr).or_default().push(id);
        }
    }

    stores_by_cell
}

type BlockSets = HashMap<BlockId, HashSet<InstrId>>;

/// `gen[B]` holds the stores of B not overwritten later within B;
/// `kill[B]` holds every other store in the function that writes a cell
/// some store of B also writes.
fn build_gen_and_kill_sets(
    function: &Function,
    stores_by_cell: &HashMap<InstrId, Vec<InstrId>>,
) -> (BlockSets, BlockSets) {
    let mut gen_sets = BlockSets::new();
    let mut kill_sets = BlockSets::new();

    for block in function.blocks.iter() {
        let gen = gen_sets.entry(block.id).or_default();
        let kill = kill_sets.entry(block.id).or_default();

        for id in &block.instructions {
            let InstructionKind::Store { ptr, .. } = function.instruction(*id).kind else {
                continue;
            };

            for other in &stores_by_cell[&ptr] {
                if other != id {
                    kill.insert(*other);
                    gen.remove(other);
                }
            }

            gen.insert(*id);
        }
    }

    (gen_sets, kill_sets)
}

/// Iterates `IN[B] = ⋃ OUT[P]`, `OUT[B] = (IN[B] \ kill[B]) ∪ gen[B]`
/// until no OUT set changes, then returns the IN sets.
fn build_in_sets(function: &Function, gen_sets: &BlockSets, kill_sets: &BlockSets) -> BlockSets {
    let predecessors = function.predecessors();

    let mut in_sets: BlockSets = function.blocks.indices().map(|b| (b, HashSet::new())).collect();
    let mut out_sets: BlockSets = function
        .blocks
        .indices()
        .map(|b| (b, gen_sets[&b].clone()))
        .collect();

    let mut changed = true;
    while changed {
        changed = false;

        for block in function.blocks.indices() {
            let in_set = predecessors[&block]
                .iter()
                .flat_map(|p| out_sets[p].iter().copied())
                .collect::<HashSet<_>>();

            let mut out_set = in_set
                .difference(&kill_sets[&block])
                .copied()
                .collect::<HashSet<_>>();
            out_set.extend(gen_sets[&block].iter().copied());

            if out_set != out_sets[&block] {
                changed = true;
            }

            in_sets.insert(block, in_set);
            out_sets.insert(block, out_set);
        }
    }

    in_sets
}

/// Walks each block simulating the reaching definitions and rewrites
/// every load whose reaching stores all write the same constant. Marked
/// loads are erased after their block has been walked.
fn rewrite_loads(
    function: &mut Function,
    stores_by_cell: &HashMap<InstrId, Vec<InstrId>>,
    in_sets: &BlockSets,
) -> bool {
    let mut to_erase = Vec::new();

    for block in function.blocks.indices().collect::<Vec<_>>() {
        let mut reaching = in_sets[&block].clone();

        for id in function.blocks[block].instructions.clone() {
            match function.instruction(id).kind {
                InstructionKind::Store { ptr, .. } => {
                    // The store kills every other reaching store to its cell
                    reaching.retain(|other| cell_of(function, *other) != ptr);
                    reaching.insert(id);
                }
                InstructionKind::Load { ptr } => {
                    let reaching_stores = stores_by_cell
                        .get(&ptr)
                        .into_iter()
                        .flatten()
                        .filter(|s| reaching.contains(*s))
                        .copied()
                        .collect::<Vec<_>>();

                    let Some(constant) = common_constant(function, &reaching_stores) else {
                        continue;
                    };

                    function.replace_all_uses_with(id, Value::Constant(constant));
                    to_erase.push(id);
                }
                _ => {}
            }
        }
    }

    for id in &to_erase {
        function.erase_instruction(*id);
    }

    !to_erase.is_empty()
}

/// The single constant every given store writes, if they all agree
fn common_constant(function: &Function, stores: &[InstrId]) -> Option<i32> {
    let first = stores.first()?;

    let Value::Constant(constant) = stored_value(function, *first) else {
        return None;
    };

    stores
        .iter()
        .all(|s| stored_value(function, *s) == Value::Constant(constant))
        .then_some(constant)
}

fn stored_value(function: &Function, store: InstrId) -> Value {
    match function.instruction(store).kind {
        InstructionKind::Store { value, .. } => value,
        _ => unreachable!("only stores are definitions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parser::Parser, SourceFile, SourceFileOrigin};
    use crate::middle::ir::{ast_lowering::lower_to_ir, Module};

    fn lower(body: &str) -> Module {
        let source = SourceFile {
            contents: format!(
                "extern void print(int); extern int read(); int f(int x) {body}"
            ),
            origin: SourceFileOrigin::Memory,
        };

        let program = Parser::parse_program(&source).expect("test program should parse");
        lower_to_ir(&program)
    }

    fn loads(function: &Function) -> usize {
        function
            .linked_instructions()
            .filter(|id| matches!(function.instruction(*id).kind, InstructionKind::Load { .. }))
            .count()
    }

    #[test]
    fn replaces_load_of_single_constant_store() {
        let mut module = lower("{ int a; a = 41; return a; }");
        let function = &mut module.functions[0];

        assert!(propagate_constants(function));

        // The load of `a` is gone and the return references the constant
        assert_eq!(loads(function), 0);
        let ret = function
            .linked_instructions()
            .find(|id| matches!(function.instruction(*id).kind, InstructionKind::Ret { .. }))
            .unwrap();
        assert_eq!(
            function.instruction(ret).kind,
            InstructionKind::Ret {
                value: Value::Constant(41)
            }
        );
    }

    #[test]
    fn does_not_replace_load_of_parameter_store() {
        let mut module = lower("{ return x; }");
        let function = &mut module.functions[0];

        // The only store writes the incoming argument, not a constant
        assert!(!propagate_constants(function));
        assert_eq!(loads(function), 1);
    }

    #[test]
    fn later_store_in_block_kills_earlier_one() {
        let mut module = lower("{ int a; a = 1; a = 2; return a; }");
        let function = &mut module.functions[0];

        assert!(propagate_constants(function));

        let ret = function
            .linked_instructions()
            .find(|id| matches!(function.instruction(*id).kind, InstructionKind::Ret { .. }))
            .unwrap();
        assert_eq!(
            function.instruction(ret).kind,
            InstructionKind::Ret {
                value: Value::Constant(2)
            }
        );
    }

    #[test]
    fn agreeing_branch_stores_propagate_through_join() {
        let mut module = lower("{ int a; if (x > 0) { a = 9; } else { a = 9; } return a; }");
        let function = &mut module.functions[0];

        assert!(propagate_constants(function));

        let ret = function
            .linked_instructions()
            .find(|id| matches!(function.instruction(*id).kind, InstructionKind::Ret { .. }))
            .unwrap();
        assert_eq!(
            function.instruction(ret).kind,
            InstructionKind::Ret {
                value: Value::Constant(9)
            }
        );
    }

    #[test]
    fn disagreeing_branch_stores_do_not_propagate() {
        let mut module = lower("{ int a; if (x > 0) { a = 1; } else { a = 2; } return a; }");
        let function = &mut module.functions[0];

        let before = loads(function);
        assert!(!propagate_constants(function));
        assert_eq!(loads(function), before);
    }

    #[test]
    fn store_in_loop_body_blocks_propagation_into_header() {
        // `i` is stored both before and inside the loop, with different
        // values reaching the header
        let mut module = lower(
            "{ int i; i = 0; while (i < x) { i = i + 1; } return i; }",
        );
        let function = &mut module.functions[0];

        propagate_constants(function);

        // The header's load of `i` must survive: the loop store reaches
        // it alongside the initial store
        assert!(loads(function) >= 1);
    }

    #[test]
    fn constant_loop_invariant_propagates() {
        let mut module = lower(
            "{ int a; int i; a = 5; i = 0; while (i < x) { i = i + a; } return i; }",
        );
        let function = &mut module.functions[0];

        assert!(propagate_constants(function));

        // Every load of `a` (the only store writes 5) is rewritten; the
        // loads of `i` survive
        let has_load_of_constant_cell = function.linked_instructions().any(|id| {
            let InstructionKind::Load { ptr } = function.instruction(id).kind else {
                return false;
            };
            matches!(
                function.instruction(ptr).kind,
                InstructionKind::Alloca { name } if name.value() == "a"
            )
        });

        assert!(!has_load_of_constant_cell);
    }
}
