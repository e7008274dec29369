//! mem2reg: promote stack slots to SSA values with phi insertion.
//!
//! The standard SSA construction algorithm:
//! 1. Find promotable allocas (scalar pointee, address never escapes: the
//!    pointer only ever appears as LOAD's pointer or STORE's destination).
//! 2. Insert phis at the iterated dominance frontier of each alloca's
//!    store blocks.
//! 3. Rename along a preorder walk of the dominator tree, keeping a stack
//!    of the current SSA value per alloca.
//!
//! Requires fresh CFG, dominator, frontier, and def-use analyses. After
//! this pass every promoted alloca and its loads/stores are gone and each
//! phi carries one `(value, predecessor_label)` pair per predecessor.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

use crate::common::error::CompileError;
use crate::common::types::Type;
use crate::ir::ir::{Inst, IrFunction, Opcode, Operand};
use crate::passes::FunctionPass;

pub struct Mem2Reg;

impl FunctionPass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        if func.blocks.is_empty() {
            return Ok(false);
        }
        let promotable = find_promotable_allocas(func);
        if promotable.is_empty() {
            return Ok(false);
        }

        let mut renamer = Renamer::new(&promotable);
        renamer.insert_phis(func, &promotable);
        renamer.seed_def_stacks(func, &promotable);
        renamer.rename_block(func, 0)?;
        renamer.erase_marked(func);
        Ok(true)
    }
}

/// Promotable allocas in discovery order: (pointer register name, stored type).
fn find_promotable_allocas(func: &IrFunction) -> Vec<(String, Type)> {
    let mut candidates: Vec<(String, Type)> = Vec::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if inst.op != Opcode::Alloca {
                continue;
            }
            let Some(result) = &inst.result else { continue };
            let Some(name) = result.reg_name() else { continue };
            let Some(pointee) = result.ty.pointee() else { continue };
            if pointee.is_array() || pointee.is_struct() {
                continue;
            }
            candidates.push((name.to_string(), pointee));
        }
    }
    if candidates.is_empty() {
        return candidates;
    }

    // Escape check: any appearance outside LOAD-pointer / STORE-destination
    // position disqualifies the alloca.
    let candidate_set: FxHashSet<&str> = candidates.iter().map(|(n, _)| n.as_str()).collect();
    let mut escaped: FxHashSet<String> = FxHashSet::default();
    for block in &func.blocks {
        for inst in &block.insts {
            for (pos, arg) in inst.args.iter().enumerate() {
                let Some(name) = arg.reg_name() else { continue };
                if !candidate_set.contains(name) {
                    continue;
                }
                let is_load_ptr = inst.op == Opcode::Load && pos == 0;
                let is_store_dest = inst.op == Opcode::Store && pos == 1;
                if !is_load_ptr && !is_store_dest {
                    escaped.insert(name.to_string());
                }
            }
        }
    }
    candidates.retain(|(n, _)| !escaped.contains(n));
    candidates
}

struct Renamer {
    promotable: FxHashMap<String, Type>,
    /// phi result register -> alloca it merges.
    phi_to_alloca: FxHashMap<String, String>,
    /// alloca -> stack of current SSA values, seeded before renaming.
    def_stacks: FxHashMap<String, Vec<Operand>>,
    /// load result register -> SSA value that replaces it.
    rename_map: FxHashMap<String, Operand>,
    /// (block, inst) positions to erase after renaming. Positions are
    /// stable because nothing is inserted after phi insertion.
    marked: FxHashSet<(usize, usize)>,
}

impl Renamer {
    fn new(promotable: &[(String, Type)]) -> Renamer {
        Renamer {
            promotable: promotable.iter().cloned().collect(),
            phi_to_alloca: FxHashMap::default(),
            def_stacks: FxHashMap::default(),
            rename_map: FxHashMap::default(),
            marked: FxHashSet::default(),
        }
    }

    /// Place phis at the iterated dominance frontier of each alloca's
    /// definition (store) blocks. Allocas are processed in discovery order
    /// and frontiers iterate by block index, keeping output deterministic.
    fn insert_phis(&mut self, func: &mut IrFunction, promotable: &[(String, Type)]) {
        for (alloca, ty) in promotable {
            let def_blocks: BTreeSet<usize> = func
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, block)| {
                    block.insts.iter().any(|inst| {
                        inst.op == Opcode::Store
                            && inst.args.get(1).and_then(|a| a.reg_name()) == Some(alloca)
                    })
                })
                .map(|(i, _)| i)
                .collect();

            let mut has_phi: FxHashSet<usize> = FxHashSet::default();
            let mut worklist: Vec<usize> = def_blocks.into_iter().collect();
            while let Some(d) = worklist.pop() {
                for target in func.blocks[d].dom_frontier.clone() {
                    if !has_phi.insert(target) {
                        continue;
                    }
                    let result = func.new_reg(*ty);
                    let result_name = result.reg_name().map(str::to_string).unwrap_or_default();
                    let at = func.blocks[target].phi_range().end;
                    func.blocks[target]
                        .insts
                        .insert(at, Inst::with_result(Opcode::Phi, vec![], result));
                    self.phi_to_alloca.insert(result_name, alloca.clone());
                    worklist.push(target);
                }
            }
        }
    }

    /// Seed each alloca's stack: the first store in the entry block, if
    /// any, supplies the initial value and is marked for deletion; an
    /// alloca with no store reads as zero of its type.
    fn seed_def_stacks(&mut self, func: &IrFunction, promotable: &[(String, Type)]) {
        for (alloca, ty) in promotable {
            let initial_store = func.blocks[0].insts.iter().position(|inst| {
                inst.op == Opcode::Store
                    && inst.args.get(1).and_then(|a| a.reg_name()) == Some(alloca)
            });
            let initial = match initial_store {
                Some(i) => {
                    self.marked.insert((0, i));
                    func.blocks[0].insts[i].args[0].clone()
                }
                None => Operand::imm(0, *ty),
            };
            self.def_stacks.insert(alloca.clone(), vec![initial]);
        }
    }

    /// Preorder walk of the dominator tree. Rewrites uses of promoted
    /// loads, turns stores into stack pushes, fills successor phis, and
    /// undoes this block's pushes and renames on the way out.
    fn rename_block(&mut self, func: &mut IrFunction, b: usize) -> Result<(), CompileError> {
        let mut pushed: FxHashMap<String, usize> = FxHashMap::default();
        let mut loads_renamed_here: Vec<String> = Vec::new();

        for i in 0..func.blocks[b].insts.len() {
            let op = func.blocks[b].insts[i].op;
            if op != Opcode::Phi {
                for arg in &mut func.blocks[b].insts[i].args {
                    if let Some(name) = arg.reg_name() {
                        if let Some(replacement) = self.rename_map.get(name) {
                            *arg = replacement.clone();
                        }
                    }
                }
            }
            match op {
                Opcode::Alloca => {
                    if let Some(name) = func.blocks[b].insts[i].result_reg() {
                        if self.promotable.contains_key(name) {
                            self.marked.insert((b, i));
                        }
                    }
                }
                Opcode::Phi => {
                    let inst = &func.blocks[b].insts[i];
                    let Some(result) = inst.result.clone() else { continue };
                    let Some(name) = result.reg_name() else { continue };
                    if let Some(alloca) = self.phi_to_alloca.get(name).cloned() {
                        self.def_stacks
                            .get_mut(&alloca)
                            .ok_or_else(|| {
                                CompileError::internal("phi merges an unseeded alloca")
                            })?
                            .push(result);
                        *pushed.entry(alloca).or_insert(0) += 1;
                    }
                }
                Opcode::Load => {
                    let inst = &func.blocks[b].insts[i];
                    let Some(ptr) = inst.args.first().and_then(|a| a.reg_name()) else {
                        continue;
                    };
                    if self.promotable.contains_key(ptr) {
                        let current = self
                            .def_stacks
                            .get(ptr)
                            .and_then(|s| s.last())
                            .cloned()
                            .ok_or_else(|| {
                                CompileError::internal("empty definition stack at load")
                            })?;
                        if let Some(result) = inst.result_reg() {
                            self.rename_map.insert(result.to_string(), current);
                            loads_renamed_here.push(result.to_string());
                        }
                        self.marked.insert((b, i));
                    }
                }
                Opcode::Store => {
                    let inst = &func.blocks[b].insts[i];
                    let Some(dest) = inst.args.get(1).and_then(|a| a.reg_name()) else {
                        continue;
                    };
                    if self.promotable.contains_key(dest) {
                        let value = inst.args[0].clone();
                        let dest = dest.to_string();
                        self.def_stacks
                            .get_mut(&dest)
                            .ok_or_else(|| {
                                CompileError::internal("store targets an unseeded alloca")
                            })?
                            .push(value);
                        *pushed.entry(dest).or_insert(0) += 1;
                        self.marked.insert((b, i));
                    }
                }
                _ => {}
            }
        }

        // Hand the current value on each edge to the successors' phis.
        let pred_label = func.blocks[b].label.clone();
        for s in func.blocks[b].succs.clone() {
            let phis = func.blocks[s].phi_range();
            for i in phis {
                let Some(name) = func.blocks[s].insts[i].result_reg() else { continue };
                let Some(alloca) = self.phi_to_alloca.get(name) else { continue };
                let top = self
                    .def_stacks
                    .get(alloca)
                    .and_then(|stack| stack.last())
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::internal("empty definition stack while filling phi")
                    })?;
                let inst = &mut func.blocks[s].insts[i];
                inst.args.push(top);
                inst.args.push(Operand::label(pred_label.clone()));
            }
        }

        for c in func.blocks[b].dom_children.clone() {
            self.rename_block(func, c)?;
        }

        for (alloca, count) in pushed {
            if let Some(stack) = self.def_stacks.get_mut(&alloca) {
                stack.truncate(stack.len() - count);
            }
        }
        for name in loads_renamed_here {
            self.rename_map.remove(&name);
        }
        Ok(())
    }

    fn erase_marked(&mut self, func: &mut IrFunction) {
        for b in 0..func.blocks.len() {
            let insts = std::mem::take(&mut func.blocks[b].insts);
            func.blocks[b].insts = insts
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !self.marked.contains(&(b, *i)))
                .map(|(_, inst)| inst)
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend;
    use crate::ir::analysis;
    use crate::ir::ir::IrModule;
    use crate::ir::lowering;

    /// Lower source and run the analyses mem2reg depends on, then mem2reg.
    fn promote(source: &str) -> IrModule {
        let mut module = lowering::lower(&frontend::parse(source).unwrap()).unwrap();
        for func in &mut module.functions {
            analysis::remove_dead_blocks(func);
            analysis::compute_dominators(func);
            analysis::compute_dominance_frontiers(func);
            analysis::build_def_use(func);
            Mem2Reg.run(func).unwrap();
        }
        module
    }

    fn count_ops(module: &IrModule, name: &str, op: Opcode) -> usize {
        module
            .function(name)
            .unwrap()
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| i.op == op)
            .count()
    }

    #[test]
    fn straight_line_locals_are_promoted() {
        let module = promote("int main() { int a; a = 42; return a; }");
        assert_eq!(count_ops(&module, "@main", Opcode::Alloca), 0);
        assert_eq!(count_ops(&module, "@main", Opcode::Load), 0);
        assert_eq!(count_ops(&module, "@main", Opcode::Store), 0);
        // return uses the stored value directly
        let f = module.function("@main").unwrap();
        let ret = f.blocks[0].insts.iter().find(|i| i.op == Opcode::Ret).unwrap();
        assert_eq!(ret.args[0].imm_value(), Some(42));
    }

    #[test]
    fn diamond_gets_a_phi_per_merged_variable() {
        let module = promote(
            "int main(int c) { int x; if (c) x = 1; else x = 2; return x; }",
        );
        let f = module.function("@main").unwrap();
        let merge = f.blocks.iter().find(|b| b.label.starts_with("ifend")).unwrap();
        let phis: Vec<&Inst> = merge.insts.iter().filter(|i| i.op == Opcode::Phi).collect();
        assert_eq!(phis.len(), 1);
        // One (value, label) pair per predecessor.
        assert_eq!(phis[0].args.len(), 2 * merge.preds.len());
    }

    #[test]
    fn loop_header_merges_both_variables() {
        let module = promote(
            "int main() { int sum; int i; sum = 0; i = 0; \
             while (i < 10) { sum = sum + i; i = i + 1; } return sum; }",
        );
        let f = module.function("@main").unwrap();
        let header = f.blocks.iter().find(|b| b.label.starts_with("whilecond")).unwrap();
        let phi_count = header.insts.iter().filter(|i| i.op == Opcode::Phi).count();
        assert_eq!(phi_count, 2);
    }

    #[test]
    fn address_taken_alloca_is_not_promoted() {
        let module = promote(
            "int deref(int *p) { return *p; } \
             int main() { int a; a = 7; return deref(&a); }",
        );
        // `a` escapes through &a; its alloca must survive.
        assert_eq!(count_ops(&module, "@main", Opcode::Alloca), 1);
    }

    #[test]
    fn aggregates_are_not_promoted() {
        let module = promote("int main() { int buf[4]; buf[0] = 1; return buf[0]; }");
        assert_eq!(count_ops(&module, "@main", Opcode::Alloca), 1);
    }

    #[test]
    fn load_without_store_reads_zero() {
        let module = promote("int main() { int a; return a; }");
        let f = module.function("@main").unwrap();
        let ret = f.blocks[0].insts.iter().find(|i| i.op == Opcode::Ret).unwrap();
        assert_eq!(ret.args[0].imm_value(), Some(0));
    }

    #[test]
    fn ssa_holds_after_promotion() {
        let module = promote(
            "int main() { int a; int b; a = 1; b = 2; \
             while (a < b) { int t; t = a; a = b; b = t; } return a; }",
        );
        let f = module.function("@main").unwrap();
        assert!(analysis::is_ssa(f));
        // Every phi has one pair per predecessor.
        for block in &f.blocks {
            for inst in &block.insts {
                if inst.op == Opcode::Phi {
                    assert_eq!(inst.args.len(), 2 * block.preds.len());
                }
            }
        }
    }
}
