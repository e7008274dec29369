//! De-SSA: lower phi nodes to copies on predecessor edges.
//!
//! Runs last, after SCCP and the post-SCCP CFG cleanup, right before the
//! backend. Each phi `%d = PHI (v1, P1), (v2, P2), ...` becomes, in every
//! predecessor `Pi`, a two-stage copy sequence inserted before the
//! terminator chain:
//!
//! ```text
//!   %t_i = MOVE v_i      ; stage 1: all reads
//!   ...
//!   %d   = MOVE %t_i     ; stage 2: all writes
//! ```
//!
//! Stage 1 reads every source into a fresh temporary before stage 2 writes
//! any destination, so parallel assignments like `a <- b, b <- a` stay
//! correct without cycle detection. All phis are erased afterwards.

use std::collections::BTreeMap;

use crate::common::error::CompileError;
use crate::ir::ir::{Inst, IrFunction, Opcode, Operand};
use crate::passes::FunctionPass;

pub struct DeSsa;

impl FunctionPass for DeSsa {
    fn name(&self) -> &'static str {
        "de-ssa"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        // (dest, src) pairs to copy at the end of each predecessor.
        let mut pending: BTreeMap<usize, Vec<(Operand, Operand)>> = BTreeMap::new();
        let mut found_phi = false;

        for block in &func.blocks {
            for i in block.phi_range() {
                let inst = &block.insts[i];
                found_phi = true;
                let dest = inst
                    .result
                    .clone()
                    .ok_or_else(|| CompileError::internal("phi without result"))?;
                for pair in inst.args.chunks(2) {
                    let [src, label] = pair else {
                        return Err(CompileError::internal("phi with odd argument count"));
                    };
                    let Some(label) = label.label_name() else {
                        return Err(CompileError::internal("phi argument without label"));
                    };
                    // A predecessor removed by the post-SCCP cleanup leaves
                    // a stale pair behind; the edge is gone, so skip it.
                    let Some(&pred) = func.label_index.get(label) else { continue };
                    pending.entry(pred).or_default().push((dest.clone(), src.clone()));
                }
            }
        }

        if !found_phi {
            return Ok(false);
        }

        for (pred, copies) in pending {
            let mut stage1 = Vec::with_capacity(copies.len());
            let mut stage2 = Vec::with_capacity(copies.len());
            for (dest, src) in copies {
                let temp = func.new_reg(dest.ty);
                stage1.push(Inst::with_result(Opcode::Move, vec![src], temp.clone()));
                stage2.push(Inst::with_result(Opcode::Move, vec![temp], dest));
            }
            let block = &mut func.blocks[pred];
            let at = block.terminator_index().unwrap_or(block.insts.len());
            block.insts.splice(at..at, stage1.into_iter().chain(stage2));
        }

        for block in &mut func.blocks {
            block.insts.retain(|inst| inst.op != Opcode::Phi);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Type;
    use crate::ir::analysis;
    use crate::ir::ir::{BasicBlock, OperandKind};

    /// Build the classic swap shape by hand:
    ///   entry: a0=1, b0=2, br loop
    ///   loop:  a1=phi(a0,entry),(b1,loop); b1=phi(b0,entry),(a1,loop); br loop-or-exit
    fn swap_function() -> IrFunction {
        let i32t = Type::i32();
        let mut f = IrFunction::new("@swap".to_string(), i32t);
        let a0 = f.new_reg(i32t);
        let b0 = f.new_reg(i32t);
        let a1 = f.new_reg(i32t);
        let b1 = f.new_reg(i32t);

        let mut entry = BasicBlock::new("entry".to_string());
        entry.insts.push(Inst::with_result(Opcode::Move, vec![Operand::imm(1, i32t)], a0.clone()));
        entry.insts.push(Inst::with_result(Opcode::Move, vec![Operand::imm(2, i32t)], b0.clone()));
        entry.insts.push(Inst::new(Opcode::Br, vec![Operand::label("loop".to_string())]));
        f.blocks.push(entry);

        let mut body = BasicBlock::new("loop".to_string());
        body.insts.push(Inst::with_result(
            Opcode::Phi,
            vec![
                a0.clone(),
                Operand::label("entry".to_string()),
                b1.clone(),
                Operand::label("loop".to_string()),
            ],
            a1.clone(),
        ));
        body.insts.push(Inst::with_result(
            Opcode::Phi,
            vec![
                b0.clone(),
                Operand::label("entry".to_string()),
                a1.clone(),
                Operand::label("loop".to_string()),
            ],
            b1.clone(),
        ));
        body.insts.push(Inst::new(Opcode::Br, vec![Operand::label("loop".to_string())]));
        f.blocks.push(body);

        analysis::build_cfg(&mut f);
        f
    }

    #[test]
    fn phis_are_erased_and_copies_staged() {
        let mut f = swap_function();
        assert!(DeSsa.run(&mut f).unwrap());
        for block in &f.blocks {
            assert!(block.insts.iter().all(|i| i.op != Opcode::Phi));
        }

        // In the loop block: two stage-1 moves into temporaries, then two
        // stage-2 moves into the phi destinations, all before the BR.
        let body = &f.blocks[1];
        let moves: Vec<&Inst> = body.insts.iter().filter(|i| i.op == Opcode::Move).collect();
        assert_eq!(moves.len(), 4);
        let stage1 = &moves[..2];
        let stage2 = &moves[2..];
        // Stage 1 reads the old values %3 (b1) and %2 (a1).
        let stage1_srcs: Vec<&str> =
            stage1.iter().filter_map(|m| m.args[0].reg_name()).collect();
        assert_eq!(stage1_srcs, vec!["%3", "%2"]);
        // Stage 2 writes the phi destinations from the temporaries.
        let stage2_dests: Vec<&str> =
            stage2.iter().filter_map(|m| m.result_reg()).collect();
        assert_eq!(stage2_dests, vec!["%2", "%3"]);
        for m in stage2 {
            let src = m.args[0].reg_name().unwrap();
            assert!(stage1.iter().any(|s| s.result_reg() == Some(src)));
        }
        // All copies precede the terminator.
        let br = body.insts.iter().position(|i| i.op == Opcode::Br).unwrap();
        let last_move = body
            .insts
            .iter()
            .rposition(|i| i.op == Opcode::Move)
            .unwrap();
        assert!(last_move < br);
    }

    #[test]
    fn single_predecessor_phi_copies_in_that_predecessor() {
        let i32t = Type::i32();
        let mut f = IrFunction::new("@f".to_string(), i32t);
        let v = f.new_reg(i32t);
        let d = f.new_reg(i32t);
        let mut entry = BasicBlock::new("entry".to_string());
        entry.insts.push(Inst::with_result(Opcode::Move, vec![Operand::imm(9, i32t)], v.clone()));
        entry.insts.push(Inst::new(Opcode::Br, vec![Operand::label("next".to_string())]));
        f.blocks.push(entry);
        let mut next = BasicBlock::new("next".to_string());
        next.insts.push(Inst::with_result(
            Opcode::Phi,
            vec![v.clone(), Operand::label("entry".to_string())],
            d.clone(),
        ));
        next.insts.push(Inst::new(Opcode::Ret, vec![d.clone()]));
        f.blocks.push(next);
        analysis::build_cfg(&mut f);

        assert!(DeSsa.run(&mut f).unwrap());
        let entry = &f.blocks[0];
        // The copies sit in the predecessor, before its BR.
        let kinds: Vec<Opcode> = entry.insts.iter().map(|i| i.op).collect();
        assert_eq!(
            kinds,
            vec![Opcode::Label, Opcode::Move, Opcode::Move, Opcode::Move, Opcode::Br]
        );
        // Destination %1 is written from a temporary, not directly from %0.
        let write = entry
            .insts
            .iter()
            .find(|i| i.result_reg() == Some("%1"))
            .unwrap();
        let OperandKind::Reg(temp) = &write.args[0].kind else {
            panic!("stage-2 source must be a register");
        };
        assert_ne!(temp, "%0");
    }

    #[test]
    fn no_phis_means_no_change() {
        let i32t = Type::i32();
        let mut f = IrFunction::new("@f".to_string(), i32t);
        let mut entry = BasicBlock::new("entry".to_string());
        entry.insts.push(Inst::new(Opcode::Ret, vec![Operand::imm(0, i32t)]));
        f.blocks.push(entry);
        analysis::build_cfg(&mut f);
        assert!(!DeSsa.run(&mut f).unwrap());
    }
}
