//! Sparse Conditional Constant Propagation.
//!
//! Propagates a three-point lattice (UNKNOWN < CONST(k) < NOT_CONST) over
//! SSA registers while simultaneously tracking block reachability. Only
//! executable blocks contribute to phi meets, so constants survive joins
//! whose other edges turn out to be dead.
//!
//! Terminator chains are a series of `TEST lhs, rhs` feeding the
//! conditional branches after them and ending in `BR`/`RET`; the most
//! recent TEST supplies each branch's operands.
//!
//! The transform then strips non-executable blocks to their labels,
//! rewrites constant-valued instructions to `MOVE imm`, and folds decided
//! branches. Requires fresh def-use chains and CFG edges; bails on
//! non-SSA input (after de-SSA the phi destinations have several
//! definitions and the lattice would be meaningless).

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::common::error::CompileError;
use crate::ir::analysis::is_ssa;
use crate::ir::ir::{IrFunction, InstRef, Opcode, Operand, OperandKind};
use crate::passes::FunctionPass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lattice {
    Unknown,
    Const(i32),
    NotConst,
}

impl Lattice {
    pub fn meet(self, other: Lattice) -> Lattice {
        match (self, other) {
            (Lattice::NotConst, _) | (_, Lattice::NotConst) => Lattice::NotConst,
            (Lattice::Unknown, v) => v,
            (v, Lattice::Unknown) => v,
            (Lattice::Const(a), Lattice::Const(b)) if a == b => Lattice::Const(a),
            _ => Lattice::NotConst,
        }
    }
}

pub struct Sccp;

impl FunctionPass for Sccp {
    fn name(&self) -> &'static str {
        "sccp"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        if func.blocks.is_empty() || !is_ssa(func) {
            return Ok(false);
        }
        let mut solver = Solver::new();
        for param in &func.params {
            if let Some(name) = param.reg_name() {
                solver.values.insert(name.to_string(), Lattice::NotConst);
            }
        }
        solver.mark_block_executable(func, 0);
        solver.solve(func)?;
        solver.transform(func)
    }
}

struct Solver {
    values: FxHashMap<String, Lattice>,
    executable: FxHashSet<usize>,
    block_worklist: VecDeque<usize>,
    ssa_worklist: VecDeque<InstRef>,
}

impl Solver {
    fn new() -> Solver {
        Solver {
            values: FxHashMap::default(),
            executable: FxHashSet::default(),
            block_worklist: VecDeque::new(),
            ssa_worklist: VecDeque::new(),
        }
    }

    fn operand_value(&self, op: &Operand) -> Lattice {
        match &op.kind {
            OperandKind::Imm(v) => Lattice::Const(*v),
            OperandKind::Reg(name) => {
                self.values.get(name).copied().unwrap_or(Lattice::Unknown)
            }
            // Globals and labels are addresses, never constants.
            OperandKind::Label(_) | OperandKind::Global(_) => Lattice::NotConst,
        }
    }

    /// Record a new lattice value for an instruction's result; on change,
    /// requeue its users (branch/TEST users requeue their whole block so
    /// the terminator chain is re-evaluated).
    fn set_value(&mut self, func: &IrFunction, at: InstRef, new_value: Lattice) {
        let inst = &func.blocks[at.block].insts[at.inst];
        let Some(name) = inst.result_reg() else { return };
        if self.values.get(name) == Some(&new_value) {
            return;
        }
        self.values.insert(name.to_string(), new_value);

        let Some(users) = func.use_sites.get(name) else { return };
        for &user in users {
            if !self.executable.contains(&user.block) {
                continue;
            }
            let user_op = func.blocks[user.block].insts[user.inst].op;
            if user_op == Opcode::Test || user_op.is_terminator() {
                self.block_worklist.push_back(user.block);
            } else {
                self.ssa_worklist.push_back(user);
            }
        }
    }

    /// Mark a block executable; queue it and the phis whose meets the new
    /// edge may sharpen (its own and its successors').
    fn mark_block_executable(&mut self, func: &IrFunction, b: usize) {
        if !self.executable.insert(b) {
            return;
        }
        self.block_worklist.push_back(b);
        for i in func.blocks[b].phi_range() {
            self.ssa_worklist.push_back(InstRef { block: b, inst: i });
        }
        for &s in &func.blocks[b].succs {
            for i in func.blocks[s].phi_range() {
                self.ssa_worklist.push_back(InstRef { block: s, inst: i });
            }
        }
    }

    fn solve(&mut self, func: &IrFunction) -> Result<(), CompileError> {
        while !self.block_worklist.is_empty() || !self.ssa_worklist.is_empty() {
            while let Some(b) = self.block_worklist.pop_front() {
                for (i, inst) in func.blocks[b].insts.iter().enumerate() {
                    if inst.op.is_terminator() || inst.op == Opcode::Test {
                        break;
                    }
                    self.visit_inst(func, InstRef { block: b, inst: i })?;
                }
                self.visit_terminators(func, b)?;
            }
            while let Some(at) = self.ssa_worklist.pop_front() {
                if self.executable.contains(&at.block) {
                    self.visit_inst(func, at)?;
                }
            }
        }
        Ok(())
    }

    fn visit_inst(&mut self, func: &IrFunction, at: InstRef) -> Result<(), CompileError> {
        let inst = &func.blocks[at.block].insts[at.inst];
        match inst.op {
            Opcode::Phi => {
                // Meet over executable incoming edges only.
                let mut value = Lattice::Unknown;
                for pair in inst.args.chunks(2) {
                    let [incoming, label] = pair else { continue };
                    let Some(label) = label.label_name() else { continue };
                    let pred = *func.label_index.get(label).ok_or_else(|| {
                        CompileError::internal(format!("phi references unknown block '{}'", label))
                    })?;
                    if self.executable.contains(&pred) {
                        value = value.meet(self.operand_value(incoming));
                    }
                }
                self.set_value(func, at, value);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                let lhs = self.operand_value(&inst.args[0]);
                let rhs = self.operand_value(&inst.args[1]);
                let value = match (lhs, rhs) {
                    (Lattice::Unknown, _) | (_, Lattice::Unknown) => Lattice::Unknown,
                    (Lattice::Const(a), Lattice::Const(b)) => match inst.op {
                        Opcode::Add => Lattice::Const(a.wrapping_add(b)),
                        Opcode::Sub => Lattice::Const(a.wrapping_sub(b)),
                        Opcode::Mul => Lattice::Const(a.wrapping_mul(b)),
                        // Division by a known zero cannot fold.
                        Opcode::Div if b == 0 => Lattice::NotConst,
                        Opcode::Div => Lattice::Const(a.wrapping_div(b)),
                        _ => unreachable!(),
                    },
                    _ => Lattice::NotConst,
                };
                self.set_value(func, at, value);
            }
            Opcode::Move => {
                let value = self.operand_value(&inst.args[0]);
                self.set_value(func, at, value);
            }
            // Calls, memory reads, address computations and I/O reads are
            // never compile-time constants.
            _ => {
                if inst.result.is_some() {
                    self.set_value(func, at, Lattice::NotConst);
                }
            }
        }
        Ok(())
    }

    /// Walk the block's terminator chain, marking reachable targets. Each
    /// conditional branch takes its operands from the most recent TEST;
    /// a statically decided branch marks only the winning side.
    fn visit_terminators(&mut self, func: &IrFunction, b: usize) -> Result<(), CompileError> {
        let mut last_test: Option<&crate::ir::ir::Inst> = None;
        for inst in &func.blocks[b].insts {
            match inst.op {
                Opcode::Test => last_test = Some(inst),
                Opcode::Ret => return Ok(()),
                Opcode::Br => {
                    let target = self.branch_target(func, inst)?;
                    self.mark_block_executable(func, target);
                    return Ok(());
                }
                Opcode::Brz | Opcode::Brlt | Opcode::Brgt => {
                    let target = self.branch_target(func, inst)?;
                    let decided = last_test.and_then(|test| {
                        let lhs = self.operand_value(&test.args[0]);
                        let rhs = self.operand_value(&test.args[1]);
                        match (lhs, rhs) {
                            (Lattice::Const(a), Lattice::Const(b)) => {
                                Some(branch_taken(inst.op, a, b))
                            }
                            _ => None,
                        }
                    });
                    match decided {
                        Some(true) => {
                            self.mark_block_executable(func, target);
                            return Ok(());
                        }
                        Some(false) => {}
                        // Unknown or non-constant operands: the branch may
                        // be taken either way.
                        None => self.mark_block_executable(func, target),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn branch_target(
        &self,
        func: &IrFunction,
        inst: &crate::ir::ir::Inst,
    ) -> Result<usize, CompileError> {
        let label = inst
            .args
            .first()
            .and_then(|a| a.label_name())
            .ok_or_else(|| CompileError::internal("branch without label operand"))?;
        func.label_index
            .get(label)
            .copied()
            .ok_or_else(|| CompileError::internal(format!("branch to unknown block '{}'", label)))
    }

    /// Apply the fixed point to the IR. Returns whether anything changed.
    fn transform(&self, func: &mut IrFunction) -> Result<bool, CompileError> {
        let mut to_delete: FxHashSet<(usize, usize)> = FxHashSet::default();
        let mut to_const: Vec<((usize, usize), i32)> = Vec::new();
        let mut to_unconditional: Vec<(usize, usize)> = Vec::new();

        for (b, block) in func.blocks.iter().enumerate() {
            if !self.executable.contains(&b) {
                for (i, inst) in block.insts.iter().enumerate() {
                    if inst.op != Opcode::Label {
                        to_delete.insert((b, i));
                    }
                }
                continue;
            }

            let mut terminator_folded = false;
            let mut last_test: Option<usize> = None;
            for (i, inst) in block.insts.iter().enumerate() {
                if terminator_folded {
                    to_delete.insert((b, i));
                    continue;
                }
                if let Some(name) = inst.result_reg() {
                    if let Some(Lattice::Const(k)) = self.values.get(name) {
                        // Skip instructions already in `MOVE imm` form so a
                        // rerun reaches a fixed point.
                        let already = inst.op == Opcode::Move
                            && inst.args.first().and_then(|a| a.imm_value()) == Some(*k);
                        if !already {
                            to_const.push(((b, i), *k));
                        }
                    }
                }
                match inst.op {
                    Opcode::Test => last_test = Some(i),
                    Opcode::Br | Opcode::Ret => terminator_folded = true,
                    Opcode::Brz | Opcode::Brlt | Opcode::Brgt => {
                        let Some(test) = last_test else { continue };
                        let test = &block.insts[test];
                        let lhs = self.operand_value(&test.args[0]);
                        let rhs = self.operand_value(&test.args[1]);
                        if let (Lattice::Const(l), Lattice::Const(r)) = (lhs, rhs) {
                            if branch_taken(inst.op, l, r) {
                                to_unconditional.push((b, i));
                                terminator_folded = true;
                            } else {
                                to_delete.insert((b, i));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let changed =
            !to_delete.is_empty() || !to_const.is_empty() || !to_unconditional.is_empty();

        for ((b, i), k) in to_const {
            if to_delete.contains(&(b, i)) {
                continue;
            }
            let inst = &mut func.blocks[b].insts[i];
            let Some(result) = &inst.result else { continue };
            let ty = result.ty;
            inst.op = Opcode::Move;
            inst.args = vec![Operand::imm(k, ty)];
        }
        for (b, i) in to_unconditional {
            if to_delete.contains(&(b, i)) {
                continue;
            }
            let inst = &mut func.blocks[b].insts[i];
            inst.op = Opcode::Br;
            inst.args.truncate(1);
        }
        if !to_delete.is_empty() {
            for b in 0..func.blocks.len() {
                let insts = std::mem::take(&mut func.blocks[b].insts);
                func.blocks[b].insts = insts
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !to_delete.contains(&(b, *i)))
                    .map(|(_, inst)| inst)
                    .collect();
            }
        }
        Ok(changed)
    }
}

fn branch_taken(op: Opcode, lhs: i32, rhs: i32) -> bool {
    match op {
        Opcode::Brz => lhs == rhs,
        Opcode::Brlt => lhs < rhs,
        Opcode::Brgt => lhs > rhs,
        _ => false,
    }
}
