//! The pass manager and the analysis passes.
//!
//! Module passes (currently none) run first over the whole module; then
//! every function pass runs on function F in registration order before the
//! next function is touched. Passes are deterministic functions of their
//! input IR, so a byte-identical AST yields byte-identical assembly.
//!
//! Set `MCC_DUMP_IR=1` to dump each function to stderr after every pass,
//! and `MCC_VERIFY_IR=1` to re-validate the IR after every pass.

pub mod dessa;
pub mod mem2reg;
pub mod sccp;

use crate::common::error::CompileError;
use crate::ir::analysis;
use crate::ir::ir::{IrFunction, IrModule};
use crate::ir::verify;

pub trait FunctionPass {
    fn name(&self) -> &'static str;
    /// Returns whether the pass changed the IR.
    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError>;
}

pub trait ModulePass {
    fn name(&self) -> &'static str;
    fn run(&mut self, module: &mut IrModule) -> Result<bool, CompileError>;
}

#[derive(Default)]
pub struct PassManager {
    module_passes: Vec<Box<dyn ModulePass>>,
    function_passes: Vec<Box<dyn FunctionPass>>,
}

impl PassManager {
    pub fn new() -> PassManager {
        PassManager::default()
    }

    pub fn add_module_pass(&mut self, pass: Box<dyn ModulePass>) {
        self.module_passes.push(pass);
    }

    pub fn add_function_pass(&mut self, pass: Box<dyn FunctionPass>) {
        self.function_passes.push(pass);
    }

    /// Run the pipeline. Returns whether any pass changed the IR.
    pub fn run(&mut self, module: &mut IrModule) -> Result<bool, CompileError> {
        let dump = std::env::var("MCC_DUMP_IR").is_ok_and(|v| v != "0");
        let check = std::env::var("MCC_VERIFY_IR").is_ok_and(|v| v != "0");
        let mut changed = false;

        for pass in &mut self.module_passes {
            changed |= pass.run(module)?;
            if dump {
                eprintln!("; after {}\n{}", pass.name(), module);
            }
            if check {
                verify::verify_module(module)?;
            }
        }

        for func in &mut module.functions {
            for pass in &mut self.function_passes {
                changed |= pass.run(func)?;
                if dump {
                    eprintln!("; after {} on {}\n{}", pass.name(), func.name, func);
                }
                if check {
                    verify::verify_function(func)?;
                }
            }
        }
        Ok(changed)
    }
}

// ── analysis passes ──────────────────────────────────────────────────────
//
// Thin wrappers over `ir::analysis`. They rebuild derived state and report
// "unchanged" (dead-block elimination excepted), so reruns reach a fixed
// point.

pub struct CfgBuild;

impl FunctionPass for CfgBuild {
    fn name(&self) -> &'static str {
        "cfg-build"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        analysis::build_cfg(func);
        Ok(false)
    }
}

pub struct DeadBlockElim;

impl FunctionPass for DeadBlockElim {
    fn name(&self) -> &'static str {
        "dead-block-elim"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        Ok(analysis::remove_dead_blocks(func))
    }
}

pub struct DominatorTree;

impl FunctionPass for DominatorTree {
    fn name(&self) -> &'static str {
        "dominator-tree"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        analysis::compute_dominators(func);
        Ok(false)
    }
}

pub struct DominanceFrontiers;

impl FunctionPass for DominanceFrontiers {
    fn name(&self) -> &'static str {
        "dominance-frontiers"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        analysis::compute_dominance_frontiers(func);
        Ok(false)
    }
}

pub struct DefUse;

impl FunctionPass for DefUse {
    fn name(&self) -> &'static str {
        "def-use"
    }

    fn run(&mut self, func: &mut IrFunction) -> Result<bool, CompileError> {
        analysis::build_def_use(func);
        Ok(false)
    }
}

/// The standard pipeline: CFG and dominator analyses, mem2reg, a def-use
/// rebuild, SCCP, a CFG cleanup of branches SCCP decided, then de-SSA.
pub fn default_pipeline() -> PassManager {
    let mut pm = PassManager::new();
    pm.add_function_pass(Box::new(CfgBuild));
    pm.add_function_pass(Box::new(DeadBlockElim));
    pm.add_function_pass(Box::new(DominatorTree));
    pm.add_function_pass(Box::new(DominanceFrontiers));
    pm.add_function_pass(Box::new(DefUse));
    pm.add_function_pass(Box::new(mem2reg::Mem2Reg));
    pm.add_function_pass(Box::new(DefUse));
    pm.add_function_pass(Box::new(sccp::Sccp));
    pm.add_function_pass(Box::new(CfgBuild));
    pm.add_function_pass(Box::new(DeadBlockElim));
    pm.add_function_pass(Box::new(dessa::DeSsa));
    pm
}
