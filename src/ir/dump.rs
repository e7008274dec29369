//! Textual IR dump for diagnostics.
//!
//! Enabled by `MCC_DUMP_IR=1`, which makes the pass manager print every
//! function after each pass. The format mirrors the instruction model:
//! `label:` lines for block heads, then `  [%res =] op arg, arg` lines.

use std::fmt;

use crate::ir::ir::{BasicBlock, Inst, IrFunction, IrModule, Opcode, Operand, OperandKind};

fn opcode_name(op: Opcode) -> &'static str {
    match op {
        Opcode::Ret => "ret",
        Opcode::Br => "br",
        Opcode::Brz => "brz",
        Opcode::Brlt => "brlt",
        Opcode::Brgt => "brgt",
        Opcode::Test => "test",
        Opcode::Alloca => "alloca",
        Opcode::Load => "load",
        Opcode::Store => "store",
        Opcode::Gep => "gep",
        Opcode::Move => "move",
        Opcode::Add => "add",
        Opcode::Sub => "sub",
        Opcode::Mul => "mul",
        Opcode::Div => "div",
        Opcode::Call => "call",
        Opcode::InputI32 => "input_i32",
        Opcode::InputI8 => "input_i8",
        Opcode::OutputI32 => "output_i32",
        Opcode::OutputI8 => "output_i8",
        Opcode::OutputStr => "output_str",
        Opcode::Label => "label",
        Opcode::Phi => "phi",
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperandKind::Imm(value) => write!(f, "{} {}", self.ty, value),
            OperandKind::Reg(name) => write!(f, "{} {}", self.ty, name),
            OperandKind::Label(name) => write!(f, "{}", name),
            OperandKind::Global(name) => write!(f, "{} {}", self.ty, name),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == Opcode::Label {
            if let Some(name) = self.args.first().and_then(|a| a.label_name()) {
                return write!(f, "{}:", name);
            }
        }
        write!(f, "  ")?;
        if let Some(result) = &self.result {
            write!(f, "{} = ", result)?;
        }
        write!(f, "{}", opcode_name(self.op))?;
        for (i, arg) in self.args.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " " } else { ", " }, arg)?;
        }
        Ok(())
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.insts {
            writeln!(f, "{}", inst)?;
        }
        Ok(())
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "define {} {}(", self.return_type, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { "" } else { ", " }, param)?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            writeln!(f, "{} = global {}", global.name, global.ty)?;
        }
        for (name, bytes) in &self.string_literals {
            write!(f, "{} = constant c\"", name)?;
            for &b in bytes {
                match b {
                    b'\n' => write!(f, "\\n")?,
                    b'\t' => write!(f, "\\t")?,
                    b'"' => write!(f, "\\\"")?,
                    b'\\' => write!(f, "\\\\")?,
                    0x20..=0x7e => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{:02x}", b)?,
                }
            }
            writeln!(f, "\\00\"")?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
