//! Structural IR validation.
//!
//! Checks the invariants the passes rely on: blocks start with a matching
//! `Label` and have unique names, branch and phi labels resolve, result
//! slots are present exactly where the opcode produces a value, and memory
//! operations go through pointer-typed operands. Violations are compiler
//! bugs and surface as internal errors.
//!
//! The pass manager runs these checks after every pass when
//! `MCC_VERIFY_IR=1`.

use rustc_hash::FxHashSet;

use crate::common::error::CompileError;
use crate::ir::ir::{IrFunction, IrModule, Opcode, OperandKind};

/// Does this opcode produce a value? `None` means the result is optional.
fn produces_result(op: Opcode) -> Option<bool> {
    match op {
        Opcode::Alloca
        | Opcode::Load
        | Opcode::Gep
        | Opcode::Move
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::InputI32
        | Opcode::InputI8
        | Opcode::Phi => Some(true),
        Opcode::Ret
        | Opcode::Br
        | Opcode::Brz
        | Opcode::Brlt
        | Opcode::Brgt
        | Opcode::Test
        | Opcode::Store
        | Opcode::OutputI32
        | Opcode::OutputI8
        | Opcode::OutputStr
        | Opcode::Label => Some(false),
        Opcode::Call => None,
    }
}

fn fail(func: &IrFunction, block: &str, what: impl std::fmt::Display) -> CompileError {
    CompileError::internal(format!("{} / {}: {}", func.name, block, what))
}

pub fn verify_module(module: &IrModule) -> Result<(), CompileError> {
    for func in &module.functions {
        verify_function(func)?;
    }
    Ok(())
}

pub fn verify_function(func: &IrFunction) -> Result<(), CompileError> {
    let mut labels: FxHashSet<&str> = FxHashSet::default();
    for block in &func.blocks {
        if !labels.insert(&block.label) {
            return Err(fail(func, &block.label, "duplicate block label"));
        }
    }

    for block in &func.blocks {
        let Some(first) = block.insts.first() else {
            return Err(fail(func, &block.label, "block has no instructions"));
        };
        if first.op != Opcode::Label
            || first.args.first().and_then(|a| a.label_name()) != Some(block.label.as_str())
        {
            return Err(fail(func, &block.label, "block does not start with its label"));
        }

        for inst in &block.insts {
            match produces_result(inst.op) {
                Some(true) if inst.result.is_none() => {
                    return Err(fail(
                        func,
                        &block.label,
                        format!("{:?} is missing its result", inst.op),
                    ));
                }
                Some(false) if inst.result.is_some() => {
                    return Err(fail(
                        func,
                        &block.label,
                        format!("{:?} must not have a result", inst.op),
                    ));
                }
                _ => {}
            }

            for arg in &inst.args {
                // Phi pairs may keep a label for an edge a cleanup pass
                // already removed (de-SSA skips those), so label operands
                // are only required to be well-formed, not resolvable;
                // branch targets are checked below.
                if let OperandKind::Label(_) = &arg.kind {
                    if !arg.ty.is_void() {
                        return Err(fail(func, &block.label, "label operand with non-void type"));
                    }
                }
            }

            match inst.op {
                Opcode::Br | Opcode::Brz | Opcode::Brlt | Opcode::Brgt => {
                    let Some(target) = inst.args.first().and_then(|a| a.label_name()) else {
                        return Err(fail(func, &block.label, "branch without label argument"));
                    };
                    if !labels.contains(target) {
                        return Err(fail(
                            func,
                            &block.label,
                            format!("branch to unknown label '{}'", target),
                        ));
                    }
                }
                Opcode::Load => {
                    if inst.args.first().map(|a| a.ty.is_pointer()) != Some(true) {
                        return Err(fail(func, &block.label, "load through non-pointer"));
                    }
                }
                Opcode::Store => {
                    if inst.args.get(1).map(|a| a.ty.is_pointer()) != Some(true) {
                        return Err(fail(func, &block.label, "store through non-pointer"));
                    }
                }
                Opcode::Gep => {
                    if inst.args.first().map(|a| a.ty.is_pointer()) != Some(true) {
                        return Err(fail(func, &block.label, "GEP base is not a pointer"));
                    }
                }
                Opcode::Phi => {
                    if inst.args.len() % 2 != 0 {
                        return Err(fail(func, &block.label, "phi with odd argument count"));
                    }
                    for pair in inst.args.chunks(2) {
                        if pair[1].label_name().is_none() {
                            return Err(fail(
                                func,
                                &block.label,
                                "phi pair without predecessor label",
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Type;
    use crate::ir::ir::{BasicBlock, Inst, Operand};

    fn ret_zero() -> Inst {
        Inst::new(Opcode::Ret, vec![Operand::imm(0, Type::i32())])
    }

    #[test]
    fn accepts_a_minimal_function() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        let mut entry = BasicBlock::new("entry".to_string());
        entry.insts.push(ret_zero());
        f.blocks.push(entry);
        assert!(verify_function(&f).is_ok());
    }

    #[test]
    fn rejects_mismatched_block_label() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        let mut entry = BasicBlock::new("entry".to_string());
        entry.label = "renamed".to_string();
        entry.insts.push(ret_zero());
        f.blocks.push(entry);
        assert!(verify_function(&f).is_err());
    }

    #[test]
    fn rejects_branch_to_missing_block() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        let mut entry = BasicBlock::new("entry".to_string());
        entry
            .insts
            .push(Inst::new(Opcode::Br, vec![Operand::label("nowhere".to_string())]));
        f.blocks.push(entry);
        assert!(verify_function(&f).is_err());
    }

    #[test]
    fn rejects_missing_result() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        let mut entry = BasicBlock::new("entry".to_string());
        entry.insts.push(Inst::new(
            Opcode::Add,
            vec![Operand::imm(1, Type::i32()), Operand::imm(2, Type::i32())],
        ));
        entry.insts.push(ret_zero());
        f.blocks.push(entry);
        assert!(verify_function(&f).is_err());
    }

    #[test]
    fn rejects_store_through_non_pointer() {
        let mut f = IrFunction::new("@f".to_string(), Type::i32());
        let mut entry = BasicBlock::new("entry".to_string());
        entry.insts.push(Inst::new(
            Opcode::Store,
            vec![Operand::imm(1, Type::i32()), Operand::imm(2, Type::i32())],
        ));
        entry.insts.push(ret_zero());
        f.blocks.push(entry);
        assert!(verify_function(&f).is_err());
    }
}
