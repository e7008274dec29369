//! CFG construction, dead-block removal, dominator tree, dominance
//! frontiers, and def-use chains.
//!
//! These are the analyses every SSA pass leans on. They write their results
//! into the `BasicBlock` / `IrFunction` derived fields; any pass that adds
//! or removes blocks or instructions invalidates them, and the pipeline
//! reruns the analyses before the next consumer.
//!
//! Dominance frontiers follow Cytron et al., "Efficiently Computing Static
//! Single Assignment Form and the Control Dependence Graph" (1991).

use rustc_hash::FxHashSet;

use crate::ir::ir::{Inst, IrFunction, InstRef, Opcode, Operand};

/// Rebuild `label_index` from the current block list.
pub fn build_label_index(func: &mut IrFunction) {
    func.label_index = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.label.clone(), i))
        .collect();
}

/// Build successor/predecessor edges from each block's terminator chain.
///
/// A block's terminators are a series of `Test`s and conditional branches
/// ending in `Br` or `Ret`. Each conditional branch contributes its target;
/// the final `Br` contributes the remaining target. A block with no
/// explicit terminator falls through to the next lexical block; that edge
/// is materialized as an explicit `Br` so that afterwards every block ends
/// with a terminator instruction.
pub fn build_cfg(func: &mut IrFunction) {
    let n = func.blocks.len();

    // Materialize fall-through edges.
    for i in 0..n {
        let terminated = func.blocks[i]
            .insts
            .last()
            .is_some_and(|inst| matches!(inst.op, Opcode::Ret | Opcode::Br));
        if !terminated && i + 1 < n {
            let next_label = func.blocks[i + 1].label.clone();
            func.blocks[i].insts.push(Inst::new(Opcode::Br, vec![Operand::label(next_label)]));
        }
    }

    build_label_index(func);
    for block in &mut func.blocks {
        block.succs.clear();
        block.preds.clear();
    }

    for i in 0..n {
        let mut targets: Vec<usize> = Vec::new();
        for inst in &func.blocks[i].insts {
            match inst.op {
                Opcode::Brz | Opcode::Brlt | Opcode::Brgt | Opcode::Br => {
                    if let Some(label) = inst.args.first().and_then(|a| a.label_name()) {
                        if let Some(&t) = func.label_index.get(label) {
                            if !targets.contains(&t) {
                                targets.push(t);
                            }
                        }
                    }
                    if inst.op == Opcode::Br {
                        break;
                    }
                }
                Opcode::Ret => break,
                _ => {}
            }
        }
        for t in targets {
            func.blocks[i].succs.push(t);
            if !func.blocks[t].preds.contains(&i) {
                func.blocks[t].preds.push(i);
            }
        }
    }
}

/// Iteratively remove every non-entry block with no predecessors until a
/// fixed point, rebuilding the CFG after each round. Required before
/// dominator analysis. Leaves the CFG freshly built.
pub fn remove_dead_blocks(func: &mut IrFunction) -> bool {
    let mut changed = false;
    loop {
        build_cfg(func);
        let dead: FxHashSet<usize> = (1..func.blocks.len())
            .filter(|&i| func.blocks[i].preds.is_empty())
            .collect();
        if dead.is_empty() {
            return changed;
        }
        changed = true;
        let mut index = 0;
        func.blocks.retain(|_| {
            let keep = !dead.contains(&index);
            index += 1;
            keep
        });
    }
}

/// Compute immediate dominators and dominator-tree children.
///
/// Classic iterative dataflow over dominator sets:
/// `Dom(entry) = {entry}`; for other blocks
/// `Dom(N) = {N} ∪ ⋂ Dom(P) for P ∈ preds(N)`, starting from the universe.
/// The immediate dominator of N is then the strict dominator of N that
/// every other strict dominator of N dominates.
pub fn compute_dominators(func: &mut IrFunction) {
    let n = func.blocks.len();
    for block in &mut func.blocks {
        block.idom = None;
        block.dom_children.clear();
    }
    if n == 0 {
        return;
    }

    // dom[i][d] == true  <=>  d dominates i
    let mut dom: Vec<Vec<bool>> = vec![vec![true; n]; n];
    dom[0] = vec![false; n];
    dom[0][0] = true;

    let mut changed = true;
    while changed {
        changed = false;
        for i in 1..n {
            let mut new_dom = vec![true; n];
            for &p in &func.blocks[i].preds {
                for d in 0..n {
                    new_dom[d] = new_dom[d] && dom[p][d];
                }
            }
            new_dom[i] = true;
            if new_dom != dom[i] {
                dom[i] = new_dom;
                changed = true;
            }
        }
    }

    for i in 1..n {
        'candidates: for d in 0..n {
            if d == i || !dom[i][d] {
                continue;
            }
            // d is the idom iff every other strict dominator of i dominates d.
            for m in 0..n {
                if m == i || m == d || !dom[i][m] {
                    continue;
                }
                if !dom[d][m] {
                    continue 'candidates;
                }
            }
            func.blocks[i].idom = Some(d);
            break;
        }
    }

    for i in 1..n {
        if let Some(d) = func.blocks[i].idom {
            func.blocks[d].dom_children.push(i);
        }
    }
}

/// Does `n` strictly dominate `w`? Walks `w`'s idom chain.
fn strictly_dominates(func: &IrFunction, n: usize, w: usize) -> bool {
    let mut cur = func.blocks[w].idom;
    while let Some(b) = cur {
        if b == n {
            return true;
        }
        cur = func.blocks[b].idom;
    }
    false
}

/// Compute dominance frontiers by a post-order walk of the dominator tree:
/// `DF(n) = DF_local(n) ∪ ⋃ DF_up(c)` over dominator-tree children `c`,
/// where `DF_local(n) = {s ∈ succ(n) : idom(s) ≠ n}` and
/// `DF_up(c) = {w ∈ DF(c) : n does not strictly dominate w}`.
pub fn compute_dominance_frontiers(func: &mut IrFunction) {
    for block in &mut func.blocks {
        block.dom_frontier.clear();
    }
    if !func.blocks.is_empty() {
        frontier_walk(func, 0);
    }
}

fn frontier_walk(func: &mut IrFunction, n: usize) {
    for s in func.blocks[n].succs.clone() {
        if func.blocks[s].idom != Some(n) {
            func.blocks[n].dom_frontier.insert(s);
        }
    }
    for c in func.blocks[n].dom_children.clone() {
        frontier_walk(func, c);
        for w in func.blocks[c].dom_frontier.clone() {
            if !strictly_dominates(func, n, w) {
                func.blocks[n].dom_frontier.insert(w);
            }
        }
    }
}

/// Rebuild `label_index`, `def_site` (register -> defining instruction) and
/// `use_sites` (register -> instructions with that register in their
/// argument list; result slots never count as uses).
pub fn build_def_use(func: &mut IrFunction) {
    build_label_index(func);
    func.def_site.clear();
    func.use_sites.clear();

    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.insts.iter().enumerate() {
            if let Some(name) = inst.result_reg() {
                func.def_site.insert(name.to_string(), InstRef { block: bi, inst: ii });
            }
        }
    }
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.insts.iter().enumerate() {
            for arg in &inst.args {
                if let Some(name) = arg.reg_name() {
                    func.use_sites
                        .entry(name.to_string())
                        .or_default()
                        .push(InstRef { block: bi, inst: ii });
                }
            }
        }
    }
}

/// True if every register result in the function is defined by exactly one
/// instruction. Holds after mem2reg and is destroyed again by de-SSA.
pub fn is_ssa(func: &IrFunction) -> bool {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for block in &func.blocks {
        for inst in &block.insts {
            if let Some(name) = inst.result_reg() {
                if !seen.insert(name) {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Type;
    use crate::ir::ir::BasicBlock;

    fn label_op(name: &str) -> Operand {
        Operand::label(name.to_string())
    }

    fn block_with(label: &str, insts: Vec<Inst>) -> BasicBlock {
        let mut b = BasicBlock::new(label.to_string());
        b.insts.extend(insts);
        b
    }

    /// entry -> (then | other), both -> join; join returns.
    fn diamond() -> IrFunction {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        f.blocks.push(block_with(
            "entry",
            vec![
                Inst::new(Opcode::Test, vec![Operand::imm(1, Type::i32()), Operand::imm(0, Type::i32())]),
                Inst::new(Opcode::Brz, vec![label_op("then")]),
                Inst::new(Opcode::Br, vec![label_op("other")]),
            ],
        ));
        f.blocks.push(block_with("then", vec![Inst::new(Opcode::Br, vec![label_op("join")])]));
        f.blocks.push(block_with("other", vec![Inst::new(Opcode::Br, vec![label_op("join")])]));
        f.blocks.push(block_with(
            "join",
            vec![Inst::new(Opcode::Ret, vec![Operand::imm(0, Type::i32())])],
        ));
        f
    }

    #[test]
    fn diamond_edges_and_dominators() {
        let mut f = diamond();
        build_cfg(&mut f);
        assert_eq!(f.blocks[0].succs, vec![1, 2]);
        assert_eq!(f.blocks[3].preds, vec![1, 2]);

        compute_dominators(&mut f);
        assert_eq!(f.blocks[1].idom, Some(0));
        assert_eq!(f.blocks[2].idom, Some(0));
        assert_eq!(f.blocks[3].idom, Some(0));
        assert_eq!(f.blocks[0].dom_children, vec![1, 2, 3]);

        compute_dominance_frontiers(&mut f);
        assert!(f.blocks[1].dom_frontier.contains(&3));
        assert!(f.blocks[2].dom_frontier.contains(&3));
        assert!(f.blocks[0].dom_frontier.is_empty());
        assert!(f.blocks[3].dom_frontier.is_empty());
    }

    #[test]
    fn loop_frontier_contains_header() {
        // entry -> cond; cond -> (body | end); body -> cond
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        f.blocks.push(block_with("entry", vec![Inst::new(Opcode::Br, vec![label_op("cond")])]));
        f.blocks.push(block_with(
            "cond",
            vec![
                Inst::new(Opcode::Test, vec![Operand::imm(1, Type::i32()), Operand::imm(0, Type::i32())]),
                Inst::new(Opcode::Brz, vec![label_op("body")]),
                Inst::new(Opcode::Br, vec![label_op("end")]),
            ],
        ));
        f.blocks.push(block_with("body", vec![Inst::new(Opcode::Br, vec![label_op("cond")])]));
        f.blocks.push(block_with(
            "end",
            vec![Inst::new(Opcode::Ret, vec![Operand::imm(0, Type::i32())])],
        ));
        build_cfg(&mut f);
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        // The loop body's frontier is the header it branches back to.
        assert!(f.blocks[2].dom_frontier.contains(&1));
        assert_eq!(f.blocks[2].idom, Some(1));
    }

    #[test]
    fn dominator_analysis_is_a_function_of_the_cfg() {
        let mut f = diamond();
        build_cfg(&mut f);
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        let idoms: Vec<Option<usize>> = f.blocks.iter().map(|b| b.idom).collect();
        let frontiers: Vec<_> = f.blocks.iter().map(|b| b.dom_frontier.clone()).collect();
        // Rerunning on an unchanged CFG reproduces the same results.
        compute_dominators(&mut f);
        compute_dominance_frontiers(&mut f);
        assert_eq!(idoms, f.blocks.iter().map(|b| b.idom).collect::<Vec<_>>());
        assert_eq!(
            frontiers,
            f.blocks.iter().map(|b| b.dom_frontier.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn unreachable_blocks_are_removed_to_fixed_point() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        f.blocks.push(block_with(
            "entry",
            vec![Inst::new(Opcode::Ret, vec![Operand::imm(0, Type::i32())])],
        ));
        // deadA -> deadB, deadB unreferenced otherwise: both must go, in
        // two rounds (deadB only loses its predecessor once deadA is gone).
        f.blocks.push(block_with("deadA", vec![Inst::new(Opcode::Br, vec![label_op("deadB")])]));
        f.blocks.push(block_with(
            "deadB",
            vec![Inst::new(Opcode::Ret, vec![Operand::imm(0, Type::i32())])],
        ));
        assert!(remove_dead_blocks(&mut f));
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].label, "entry");
        assert!(!remove_dead_blocks(&mut f));
    }

    #[test]
    fn fall_through_is_materialized() {
        let mut f = IrFunction::new("@f".to_string(), Type::void());
        f.blocks.push(block_with("entry", vec![]));
        f.blocks.push(block_with("next", vec![Inst::new(Opcode::Ret, vec![])]));
        build_cfg(&mut f);
        let last = f.blocks[0].insts.last().unwrap();
        assert_eq!(last.op, Opcode::Br);
        assert_eq!(last.args[0].label_name(), Some("next"));
        assert_eq!(f.blocks[0].succs, vec![1]);
    }

    #[test]
    fn def_use_records_arguments_not_results() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        let a = f.new_reg(Type::i32());
        let b = f.new_reg(Type::i32());
        f.blocks.push(block_with(
            "entry",
            vec![
                Inst::with_result(Opcode::Move, vec![Operand::imm(1, Type::i32())], a.clone()),
                Inst::with_result(Opcode::Add, vec![a.clone(), a.clone()], b.clone()),
                Inst::new(Opcode::Ret, vec![b.clone()]),
            ],
        ));
        build_def_use(&mut f);
        assert_eq!(f.def_site["%0"], InstRef { block: 0, inst: 1 });
        assert_eq!(f.def_site["%1"], InstRef { block: 0, inst: 2 });
        assert_eq!(f.use_sites["%0"].len(), 2);
        assert_eq!(f.use_sites["%1"], vec![InstRef { block: 0, inst: 3 }]);
        assert!(is_ssa(&f));
    }
}
