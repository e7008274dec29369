//! Greedy register-caching assembly emitter.
//!
//! Lowers post-SSA IR to the VM's assembly text. Every non-void result and
//! every parameter has a stack "home" slot; a small cache tracks which
//! values currently sit in physical registers. The cache is local to
//! straight-line code: it is written back and emptied at every label,
//! branch and call, so across any control-flow boundary values live only
//! in their home slots. After a call the cache is discarded without
//! writeback (the registers no longer hold the cached values; the homes
//! are still current).
//!
//! Output layout: text-segment prologue (SP/FP setup, `RA = EXIT`, jump to
//! `FUNCmain`), one section per function, then the data segment. Label
//! scheme: `FUNC<name>` for functions, `VAR<name>` for globals,
//! `STR<n>` for strings, `LL<n>` for internal labels, `EXIT` at the end
//! of the text prologue.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::common::error::CompileError;
use crate::common::types::Type;
use crate::ir::ir::{Inst, IrFunction, IrModule, Opcode, Operand, OperandKind};

use super::{MAX_REG_ARGS, REG_FP, REG_IO, REG_RA, REG_RETVAL, REG_SP, SCRATCH};

/// Emit the whole module as assembly text.
pub fn generate(module: &IrModule) -> Result<String, CompileError> {
    let mut gen = AsmGen::new(module);
    gen.generate()?;
    Ok(gen.out)
}

struct AsmGen<'a> {
    module: &'a IrModule,
    out: String,

    /// IR global name (`@x`, `@strN`) -> assembly label.
    global_labels: FxHashMap<String, String>,

    // Per-function frame state. Homes are FP-relative byte offsets.
    alloca_home: BTreeMap<String, i32>,
    temp_home: BTreeMap<String, i32>,
    temp_type: FxHashMap<String, Type>,
    frame_size: i32,

    // The register cache: value name <-> physical register. Ordered maps so
    // spill order is deterministic.
    reg_cache: BTreeMap<String, u32>,
    reg_cache_rev: BTreeMap<u32, String>,

    /// Counter for internal `LL<n>` labels, shared across functions.
    label_counter: u32,
}

impl<'a> AsmGen<'a> {
    fn new(module: &'a IrModule) -> AsmGen<'a> {
        AsmGen {
            module,
            out: String::new(),
            global_labels: FxHashMap::default(),
            alloca_home: BTreeMap::new(),
            temp_home: BTreeMap::new(),
            temp_type: FxHashMap::default(),
            frame_size: 0,
            reg_cache: BTreeMap::new(),
            reg_cache_rev: BTreeMap::new(),
            label_counter: 0,
        }
    }

    fn generate(&mut self) -> Result<(), CompileError> {
        let module = self.module;
        self.assign_global_labels();
        if module.function("@main").is_none() {
            return Err(CompileError::UnknownSymbol("main".to_string()));
        }

        self.emit(&format!("LOD R{}, 65535", REG_SP), "init stack pointer");
        self.emit(&format!("LOD R{}, R{}", REG_FP, REG_SP), "init frame pointer");
        self.emit(&format!("LOD R{}, EXIT", REG_RA), "main returns to EXIT");
        self.emit("JMP FUNCmain", "");
        self.emit_label("EXIT");
        self.emit("END", "");

        for func in &module.functions {
            self.visit_function(func)?;
        }

        self.out.push('\n');
        for global in &module.globals {
            let label = self.global_labels[&global.name].clone();
            self.emit_label(&label);
            self.emit(
                &format!("DBN 0, {}", global.ty.size()),
                &format!("global {}", &global.name[1..]),
            );
        }
        for (name, bytes) in &module.string_literals {
            let label = self.global_labels[name].clone();
            self.emit_label(&label);
            let mut data = String::from("DBS ");
            for &b in bytes {
                let _ = write!(data, "{}, ", b);
            }
            data.push('0');
            self.emit(&data, &format!("\"{}\"", escape_bytes(bytes)));
        }
        Ok(())
    }

    fn assign_global_labels(&mut self) {
        let module = self.module;
        for (i, (name, _)) in module.string_literals.iter().enumerate() {
            self.global_labels.insert(name.clone(), format!("STR{}", i));
        }
        for global in &module.globals {
            self.global_labels
                .insert(global.name.clone(), format!("VAR{}", &global.name[1..]));
        }
        for func in &module.functions {
            self.global_labels
                .insert(func.name.clone(), format!("FUNC{}", &func.name[1..]));
        }
    }

    // ── emission helpers ─────────────────────────────────────────────────

    fn emit(&mut self, text: &str, comment: &str) {
        if comment.is_empty() {
            let _ = writeln!(self.out, "\t{}", text);
        } else {
            let _ = writeln!(self.out, "\t{:<24}# {}", text, comment);
        }
    }

    fn emit_label(&mut self, label: &str) {
        let _ = writeln!(self.out, "{}:", label);
    }

    fn internal_label(&mut self) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        format!("LL{}", n)
    }

    /// `(R11)`, `(R11 + k)` or `(R11 - k)`.
    fn fp_slot(offset: i32) -> String {
        match offset {
            0 => format!("(R{})", REG_FP),
            o if o > 0 => format!("(R{} + {})", REG_FP, o),
            o => format!("(R{} - {})", REG_FP, -o),
        }
    }

    /// LOD/STO for word values, LDC/STC for chars.
    fn mem_op(ty: Type, is_load: bool) -> &'static str {
        if ty.is_char() {
            if is_load {
                "LDC"
            } else {
                "STC"
            }
        } else if is_load {
            "LOD"
        } else {
            "STO"
        }
    }

    fn asm_label_of(&self, op: &Operand) -> Result<String, CompileError> {
        match &op.kind {
            OperandKind::Label(name) => Ok(name.clone()),
            OperandKind::Global(name) => self
                .global_labels
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::internal(format!("no label for global '{}'", name))),
            _ => Err(CompileError::internal("operand has no label")),
        }
    }

    // ── the register cache ───────────────────────────────────────────────

    /// Write the value cached in `reg` (if any) back to its home slot and
    /// drop the mapping.
    fn spill_reg(&mut self, reg: u32) -> Result<(), CompileError> {
        let Some(name) = self.reg_cache_rev.get(&reg).cloned() else {
            return Ok(());
        };
        let home = *self.temp_home.get(&name).ok_or_else(|| {
            CompileError::internal(format!("no home slot for '{}' at spill", name))
        })?;
        let ty = *self.temp_type.get(&name).ok_or_else(|| {
            CompileError::internal(format!("no type for '{}' at spill", name))
        })?;
        let mnemonic = Self::mem_op(ty, false);
        self.emit(
            &format!("{} {}, R{}", mnemonic, Self::fp_slot(home), reg),
            &format!("spill {}", name),
        );
        self.reg_cache.remove(&name);
        self.reg_cache_rev.remove(&reg);
        Ok(())
    }

    /// Write every cached value back to its home slot and empty the cache.
    /// Required before any label, branch or call.
    fn spill_all(&mut self) -> Result<(), CompileError> {
        let live: Vec<(String, u32)> =
            self.reg_cache.iter().map(|(n, &r)| (n.clone(), r)).collect();
        for (name, reg) in live {
            let home = *self.temp_home.get(&name).ok_or_else(|| {
                CompileError::internal(format!("no home slot for '{}' at spill", name))
            })?;
            let ty = *self.temp_type.get(&name).ok_or_else(|| {
                CompileError::internal(format!("no type for '{}' at spill", name))
            })?;
            let mnemonic = Self::mem_op(ty, false);
            self.emit(
                &format!("{} {}, R{}", mnemonic, Self::fp_slot(home), reg),
                &format!("spill {}", name),
            );
        }
        self.reg_cache.clear();
        self.reg_cache_rev.clear();
        Ok(())
    }

    /// Drop all cache mappings without writing anything back. Used after a
    /// call or return, when the registers no longer hold the cached values
    /// but every home slot is still current.
    fn purge_cache(&mut self) {
        self.reg_cache.clear();
        self.reg_cache_rev.clear();
    }

    /// Get `op` into `target`, spilling whatever occupies it.
    fn ensure_in_reg(&mut self, op: &Operand, target: u32) -> Result<(), CompileError> {
        match &op.kind {
            OperandKind::Imm(value) => {
                self.spill_reg(target)?;
                self.emit(&format!("LOD R{}, {}", target, value), "load immediate");
                Ok(())
            }
            OperandKind::Global(_) | OperandKind::Label(_) => {
                self.spill_reg(target)?;
                let label = self.asm_label_of(op)?;
                self.emit(&format!("LOD R{}, {}", target, label), "load address");
                Ok(())
            }
            OperandKind::Reg(name) => {
                if self.reg_cache.get(name) == Some(&target) {
                    return Ok(());
                }
                if let Some(&old) = self.reg_cache.get(name) {
                    self.spill_reg(target)?;
                    self.emit(
                        &format!("LOD R{}, R{}", target, old),
                        &format!("move {}", name),
                    );
                    self.reg_cache_rev.remove(&old);
                    self.reg_cache.insert(name.clone(), target);
                    self.reg_cache_rev.insert(target, name.clone());
                    return Ok(());
                }
                if let Some(&offset) = self.alloca_home.get(name) {
                    // The value of an alloca pointer is its slot address.
                    // Not cached: it is one add away from FP.
                    self.spill_reg(target)?;
                    self.emit(
                        &format!("LOD R{}, R{}", target, REG_FP),
                        &format!("address of {}", name),
                    );
                    if offset != 0 {
                        let (op_text, k) =
                            if offset < 0 { ("SUB", -offset) } else { ("ADD", offset) };
                        self.emit(&format!("{} R{}, {}", op_text, target, k), "");
                    }
                    return Ok(());
                }
                self.spill_reg(target)?;
                let home = *self.temp_home.get(name).ok_or_else(|| {
                    CompileError::internal(format!("no home slot for '{}' at reload", name))
                })?;
                let ty = *self.temp_type.get(name).ok_or_else(|| {
                    CompileError::internal(format!("no type for '{}' at reload", name))
                })?;
                let mnemonic = Self::mem_op(ty, true);
                self.emit(
                    &format!("{} R{}, {}", mnemonic, target, Self::fp_slot(home)),
                    &format!("reload {}", name),
                );
                self.reg_cache.insert(name.clone(), target);
                self.reg_cache_rev.insert(target, name.clone());
                Ok(())
            }
        }
    }

    /// Declare that `target` is about to receive the value of `result`.
    /// The caller emits the computing instruction next.
    fn assign_to_reg(&mut self, result: &Operand, target: u32) -> Result<(), CompileError> {
        let name = result
            .reg_name()
            .ok_or_else(|| CompileError::internal("instruction result must be a register"))?;
        self.spill_reg(target)?;
        if let Some(&old) = self.reg_cache.get(name) {
            if old != target {
                self.reg_cache_rev.remove(&old);
            }
        }
        self.reg_cache.insert(name.to_string(), target);
        self.reg_cache_rev.insert(target, name.to_string());
        Ok(())
    }

    // ── function lowering ────────────────────────────────────────────────

    fn visit_function(&mut self, func: &IrFunction) -> Result<(), CompileError> {
        self.out.push('\n');
        let label = self.global_labels[&func.name].clone();
        self.emit_label(&label);

        self.alloca_home.clear();
        self.temp_home.clear();
        self.temp_type.clear();
        self.reg_cache.clear();
        self.reg_cache_rev.clear();

        // Slot planning. Register-passed parameters get homes below FP;
        // stack-passed ones already live above it (old FP and RA occupy 8
        // bytes, so the first stack argument sits at FP + 12).
        let mut local = 0i32;
        let mut stack_param_offset = 12i32;
        for (i, param) in func.params.iter().enumerate() {
            let name = param
                .reg_name()
                .ok_or_else(|| CompileError::internal("parameter is not a register"))?;
            self.temp_type.insert(name.to_string(), param.ty);
            if i < MAX_REG_ARGS {
                local += param.ty.size() as i32;
                self.temp_home.insert(name.to_string(), -local);
            } else {
                self.temp_home.insert(name.to_string(), stack_param_offset);
                stack_param_offset += 4;
            }
        }
        for block in &func.blocks {
            for inst in &block.insts {
                if inst.op == Opcode::Alloca {
                    let result = inst
                        .result
                        .as_ref()
                        .ok_or_else(|| CompileError::internal("alloca without result"))?;
                    let name = result
                        .reg_name()
                        .ok_or_else(|| CompileError::internal("alloca result is not a register"))?;
                    let pointee = result
                        .ty
                        .pointee()
                        .ok_or_else(|| CompileError::internal("alloca result is not a pointer"))?;
                    local += pointee.size() as i32;
                    self.alloca_home.insert(name.to_string(), -local);
                } else if let Some(result) = &inst.result {
                    if result.ty.is_void() {
                        continue;
                    }
                    let name = result.reg_name().ok_or_else(|| {
                        CompileError::internal("instruction result is not a register")
                    })?;
                    local += 4;
                    self.temp_home.insert(name.to_string(), -local);
                    self.temp_type.insert(name.to_string(), result.ty);
                }
            }
        }
        self.frame_size = local;

        // Prologue.
        self.emit(&format!("STO (R{}), R{}", REG_SP, REG_FP), "push old FP");
        self.emit(&format!("SUB R{}, 4", REG_SP), "");
        self.emit(&format!("STO (R{}), R{}", REG_SP, REG_RA), "push return address");
        self.emit(&format!("SUB R{}, 4", REG_SP), "");
        self.emit(&format!("LOD R{}, R{}", REG_FP, REG_SP), "FP = SP");
        if self.frame_size > 0 {
            self.emit(
                &format!("SUB R{}, {}", REG_SP, self.frame_size),
                "allocate frame",
            );
        }

        // Park register-passed parameters in their homes.
        for (i, param) in func.params.iter().take(MAX_REG_ARGS).enumerate() {
            let Some(name) = param.reg_name() else { continue };
            let home = self.temp_home[name];
            let mnemonic = Self::mem_op(param.ty, false);
            self.emit(
                &format!("{} {}, R{}", mnemonic, Self::fp_slot(home), REG_RETVAL + i as u32),
                &format!("park param {}", name),
            );
        }

        for block in &func.blocks {
            for inst in &block.insts {
                self.visit_inst(inst)?;
            }
        }
        Ok(())
    }

    fn visit_inst(&mut self, inst: &Inst) -> Result<(), CompileError> {
        match inst.op {
            Opcode::Label => {
                self.spill_all()?;
                let label = self.asm_label_of(&inst.args[0])?;
                self.emit_label(&label);
            }

            Opcode::Ret => {
                if let Some(value) = inst.args.first() {
                    self.ensure_in_reg(value, REG_RETVAL)?;
                }
                self.emit(&format!("LOD R{}, R{}", REG_SP, REG_FP), "SP = FP");
                self.emit(
                    &format!("LOD R{}, (R{} + 4)", REG_RA, REG_SP),
                    "pop return address",
                );
                self.emit(&format!("LOD R{}, (R{} + 8)", REG_FP, REG_SP), "pop old FP");
                self.emit(&format!("ADD R{}, 8", REG_SP), "");
                self.emit(&format!("JMP R{}", REG_RA), "return");
                self.purge_cache();
            }

            Opcode::Br => {
                self.spill_all()?;
                let target = self.asm_label_of(&inst.args[0])?;
                self.emit(&format!("JMP {}", target), "");
            }

            Opcode::Test => {
                self.ensure_in_reg(&inst.args[0], SCRATCH[0])?;
                self.ensure_in_reg(&inst.args[1], SCRATCH[1])?;
                self.spill_reg(SCRATCH[2])?;
                self.emit(&format!("LOD R{}, R{}", SCRATCH[2], SCRATCH[0]), "copy lhs");
                self.emit(&format!("SUB R{}, R{}", SCRATCH[2], SCRATCH[1]), "lhs - rhs");
                self.emit(&format!("TST R{}", SCRATCH[2]), "");
            }

            Opcode::Brz | Opcode::Brlt | Opcode::Brgt => {
                self.spill_all()?;
                // Spills do not touch R10, but re-set the flags so the jump
                // directly follows its TST.
                self.emit(&format!("TST R{}", SCRATCH[2]), "flags from pending TEST");
                let target = self.asm_label_of(&inst.args[0])?;
                let jump = match inst.op {
                    Opcode::Brz => "JEZ",
                    Opcode::Brlt => "JLZ",
                    _ => "JGZ",
                };
                self.emit(&format!("{} {}", jump, target), "");
            }

            // Handled during slot planning.
            Opcode::Alloca => {}

            Opcode::Load => {
                let ptr = &inst.args[0];
                let pointee = ptr
                    .ty
                    .pointee()
                    .ok_or_else(|| CompileError::internal("load through non-pointer"))?;
                let mnemonic = Self::mem_op(pointee, true);
                let result = inst
                    .result
                    .as_ref()
                    .ok_or_else(|| CompileError::internal("load without result"))?;
                if let Some(offset) =
                    ptr.reg_name().and_then(|n| self.alloca_home.get(n)).copied()
                {
                    self.assign_to_reg(result, SCRATCH[0])?;
                    self.emit(
                        &format!("{} R{}, {}", mnemonic, SCRATCH[0], Self::fp_slot(offset)),
                        "load local",
                    );
                } else {
                    self.ensure_in_reg(ptr, SCRATCH[1])?;
                    self.assign_to_reg(result, SCRATCH[0])?;
                    self.emit(
                        &format!("{} R{}, (R{})", mnemonic, SCRATCH[0], SCRATCH[1]),
                        "load through pointer",
                    );
                }
            }

            Opcode::Store => {
                let dest = &inst.args[1];
                let pointee = dest
                    .ty
                    .pointee()
                    .ok_or_else(|| CompileError::internal("store through non-pointer"))?;
                let mnemonic = Self::mem_op(pointee, false);
                self.ensure_in_reg(&inst.args[0], SCRATCH[0])?;
                if let Some(offset) =
                    dest.reg_name().and_then(|n| self.alloca_home.get(n)).copied()
                {
                    self.emit(
                        &format!("{} {}, R{}", mnemonic, Self::fp_slot(offset), SCRATCH[0]),
                        "store local",
                    );
                } else {
                    self.ensure_in_reg(dest, SCRATCH[1])?;
                    self.emit(
                        &format!("{} (R{}), R{}", mnemonic, SCRATCH[1], SCRATCH[0]),
                        "store through pointer",
                    );
                }
            }

            Opcode::Gep => self.visit_gep(inst)?,

            Opcode::Move => {
                let result = inst
                    .result
                    .as_ref()
                    .ok_or_else(|| CompileError::internal("move without result"))?;
                self.ensure_in_reg(&inst.args[0], SCRATCH[0])?;
                self.assign_to_reg(result, SCRATCH[0])?;
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                let result = inst
                    .result
                    .as_ref()
                    .ok_or_else(|| CompileError::internal("arithmetic without result"))?;
                self.ensure_in_reg(&inst.args[0], SCRATCH[0])?;
                self.ensure_in_reg(&inst.args[1], SCRATCH[1])?;
                self.assign_to_reg(result, SCRATCH[2])?;
                let op_text = match inst.op {
                    Opcode::Add => "ADD",
                    Opcode::Sub => "SUB",
                    Opcode::Mul => "MUL",
                    _ => "DIV",
                };
                self.emit(&format!("LOD R{}, R{}", SCRATCH[2], SCRATCH[0]), "copy lhs");
                self.emit(&format!("{} R{}, R{}", op_text, SCRATCH[2], SCRATCH[1]), "");
            }

            Opcode::Call => self.visit_call(inst)?,

            Opcode::InputI32 | Opcode::InputI8 => {
                let result = inst
                    .result
                    .as_ref()
                    .ok_or_else(|| CompileError::internal("input without result"))?;
                self.spill_reg(REG_IO)?;
                self.emit(if inst.op == Opcode::InputI32 { "ITI" } else { "ITC" }, "");
                self.assign_to_reg(result, REG_IO)?;
            }

            Opcode::OutputI32 | Opcode::OutputI8 | Opcode::OutputStr => {
                self.ensure_in_reg(&inst.args[0], REG_IO)?;
                let text = match inst.op {
                    Opcode::OutputI32 => "OTI",
                    Opcode::OutputI8 => "OTC",
                    _ => "OTS",
                };
                self.emit(text, "");
            }

            Opcode::Phi => {
                return Err(CompileError::internal("phi reached the emitter"));
            }
        }
        Ok(())
    }

    /// Pointer arithmetic into an aggregate. The base address accumulates
    /// in R8; struct fields add immediate offsets, array elements add a
    /// scaled index.
    fn visit_gep(&mut self, inst: &Inst) -> Result<(), CompileError> {
        let base = &inst.args[0];
        let result = inst
            .result
            .as_ref()
            .ok_or_else(|| CompileError::internal("GEP without result"))?;
        self.ensure_in_reg(base, SCRATCH[0])?;
        // R8 is about to be clobbered by the offset accumulation; detach it
        // from the value it cached so nothing later reads the sum as the
        // base.
        self.spill_reg(SCRATCH[0])?;

        let mut current = base
            .ty
            .pointee()
            .ok_or_else(|| CompileError::internal("GEP base is not a pointer"))?;
        for (i, index) in inst.args[1..].iter().enumerate() {
            if i == 0 {
                if index.imm_value() == Some(0) {
                    continue;
                }
                let size = current.size();
                self.scaled_index_add(index, size)?;
            } else if current.is_struct() {
                let field = index
                    .imm_value()
                    .ok_or_else(|| CompileError::internal("struct GEP index must be immediate"))?
                    as usize;
                let offset = current.field_offset(field);
                if offset > 0 {
                    self.spill_reg(SCRATCH[2])?;
                    self.emit(
                        &format!("LOD R{}, {}", SCRATCH[2], offset),
                        "field offset",
                    );
                    self.emit(&format!("ADD R{}, R{}", SCRATCH[0], SCRATCH[2]), "");
                }
                current = current
                    .field_type(field)
                    .ok_or_else(|| CompileError::internal("GEP field index out of range"))?;
            } else if current.is_array() {
                let element = current.element().expect("array has element type");
                self.scaled_index_add(index, element.size())?;
                current = element;
            } else {
                return Err(CompileError::internal(format!(
                    "GEP into non-aggregate type {}",
                    current
                )));
            }
        }
        self.assign_to_reg(result, SCRATCH[0])?;
        Ok(())
    }

    /// `R8 += index * size` via R9 (index) and R10 (product).
    fn scaled_index_add(&mut self, index: &Operand, size: usize) -> Result<(), CompileError> {
        self.spill_reg(SCRATCH[2])?;
        self.emit(&format!("LOD R{}, {}", SCRATCH[2], size), "element size");
        self.ensure_in_reg(index, SCRATCH[1])?;
        self.emit(&format!("MUL R{}, R{}", SCRATCH[2], SCRATCH[1]), "index * size");
        self.emit(&format!("ADD R{}, R{}", SCRATCH[0], SCRATCH[2]), "advance base");
        Ok(())
    }

    fn visit_call(&mut self, inst: &Inst) -> Result<(), CompileError> {
        self.spill_all()?;
        let callee = self.asm_label_of(&inst.args[0])?;
        let args = &inst.args[1..];

        for (i, arg) in args.iter().take(MAX_REG_ARGS).enumerate() {
            self.ensure_in_reg(arg, REG_RETVAL + i as u32)?;
        }
        // Extra arguments go on the stack rightmost first, so the callee
        // sees its fifth parameter at FP + 12 and the rest above it.
        let mut stack_bytes = 0;
        for arg in args.iter().skip(MAX_REG_ARGS).rev() {
            self.ensure_in_reg(arg, SCRATCH[0])?;
            let mnemonic = Self::mem_op(arg.ty, false);
            self.emit(
                &format!("{} (R{}), R{}", mnemonic, REG_SP, SCRATCH[0]),
                "push stack argument",
            );
            self.emit(&format!("SUB R{}, 4", REG_SP), "");
            stack_bytes += 4;
        }

        let ret_label = self.internal_label();
        self.emit(
            &format!("LOD R{}, {}", REG_RA, ret_label),
            "set return address",
        );
        self.emit(&format!("JMP {}", callee), "call");
        self.emit_label(&ret_label);
        // The callee owned the caller-saved registers; every cached value
        // is stale, but the homes written by spill_all above are current.
        self.purge_cache();

        if stack_bytes > 0 {
            self.emit(
                &format!("ADD R{}, {}", REG_SP, stack_bytes),
                "pop stack arguments",
            );
        }
        if let Some(result) = &inst.result {
            self.assign_to_reg(result, REG_RETVAL)?;
        }
        Ok(())
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut text = String::new();
    for &b in bytes {
        match b {
            b'\n' => text.push_str("\\n"),
            b'\t' => text.push_str("\\t"),
            0x20..=0x7e => text.push(b as char),
            _ => {
                let _ = write!(text, "\\{:02x}", b);
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend;
    use crate::ir::lowering;
    use crate::passes;

    fn compile(source: &str) -> String {
        let mut module = lowering::lower(&frontend::parse(source).unwrap()).unwrap();
        passes::default_pipeline().run(&mut module).unwrap();
        generate(&module).unwrap()
    }

    fn lines(asm: &str) -> Vec<&str> {
        asm.lines().map(|l| l.split('#').next().unwrap().trim()).collect()
    }

    #[test]
    fn simple_return_has_prologue_value_epilogue() {
        let asm = compile("int main() { return 0; }");
        let lines = lines(&asm);
        let main_at = lines.iter().position(|l| *l == "FUNCmain:").unwrap();
        let body = &lines[main_at..];
        assert!(body.contains(&"STO (R12), R11"));
        assert!(body.contains(&"LOD R2, 0"));
        assert!(body.contains(&"JMP R14"));
        // Entry prologue jumps to main and halts at EXIT.
        assert!(lines.contains(&"JMP FUNCmain"));
        let exit_at = lines.iter().position(|l| *l == "EXIT:").unwrap();
        assert_eq!(lines[exit_at + 1], "END");
    }

    #[test]
    fn conditional_jumps_follow_a_tst() {
        let asm = compile(
            "int main() { int i; i = 0; while (i < 10) { i = i + 1; } output i; return 0; }",
        );
        let lines = lines(&asm);
        for (i, line) in lines.iter().enumerate() {
            if line.starts_with("JEZ") || line.starts_with("JLZ") || line.starts_with("JGZ") {
                assert!(
                    lines[i - 1].starts_with("TST"),
                    "conditional jump at line {} not preceded by TST: {}",
                    i,
                    line
                );
            }
        }
    }

    #[test]
    fn call_sets_return_address_and_reads_r2() {
        let asm = compile(
            "int twice(int x) { return x + x; } int main() { output twice(21); return 0; }",
        );
        let lines = lines(&asm);
        let call_at = lines.iter().position(|l| *l == "JMP FUNCtwice").unwrap();
        assert!(lines[call_at - 1].starts_with("LOD R14, LL"));
        assert_eq!(lines[call_at + 1], "LL0:");
        // The argument goes to R2 before the jump.
        assert!(lines[..call_at].iter().any(|l| l.starts_with("LOD R2, 21")));
    }

    #[test]
    fn stack_arguments_are_pushed_rightmost_first() {
        let asm = compile(
            "int six(int a, int b, int c, int d, int e, int f) { return a + f; } \
             int main() { return six(1, 2, 3, 4, 5, 6); }",
        );
        let lines = lines(&asm);
        let call_at = lines.iter().position(|l| *l == "JMP FUNCsix").unwrap();
        // Two stack pushes before the call: 6 first, then 5.
        let imm_loads: Vec<&str> = lines[..call_at]
            .iter()
            .copied()
            .filter(|l| {
                l.strip_prefix("LOD R8, ")
                    .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
            })
            .collect();
        assert_eq!(imm_loads, vec!["LOD R8, 6", "LOD R8, 5"]);
        // The caller pops its 8 bytes of stack arguments after the call.
        assert!(lines[call_at..].contains(&"ADD R12, 8"));
    }

    #[test]
    fn globals_and_strings_land_in_the_data_segment() {
        let asm = compile(
            "int counter; int main() { counter = 1; output \"ok\"; return counter; }",
        );
        assert!(asm.contains("VARcounter:"));
        assert!(asm.contains("DBN 0, 4"));
        assert!(asm.contains("STR0:"));
        assert!(asm.contains("DBS 111, 107, 0"));
        // Code references the data labels.
        assert!(asm.contains("LOD R9, VARcounter") || asm.contains("LOD R15, VARcounter"));
        assert!(asm.contains("LOD R15, STR0"));
    }

    #[test]
    fn char_values_use_byte_memory_ops() {
        // The branch forces the char across a control-flow boundary, so it
        // is spilled with STC and reloaded with LDC.
        let asm = compile("int main() { char c; input c; if (c > 0) output c; return 0; }");
        assert!(asm.contains("ITC"));
        assert!(asm.contains("OTC"));
        assert!(asm.contains("STC"));
        assert!(asm.contains("LDC"));
    }

    #[test]
    fn missing_main_is_an_error() {
        let mut module =
            lowering::lower(&frontend::parse("int helper() { return 1; }").unwrap()).unwrap();
        passes::default_pipeline().run(&mut module).unwrap();
        assert!(matches!(
            generate(&module),
            Err(CompileError::UnknownSymbol(name)) if name == "main"
        ));
    }
}
