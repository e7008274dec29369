//! AST -> IR lowering.
//!
//! A single preorder walk over the typed AST. Every variable and parameter
//! lives in a stack slot at this stage (`Alloca` + `Load`/`Store`); SSA
//! construction happens later in mem2reg. A first pass over the program
//! registers globals and function signatures in the module symbol table so
//! forward references work; a second pass lowers function bodies.
//!
//! Statement lowering lives in `stmt.rs`, expression and l-value lowering
//! in `expr.rs`.

mod expr;
mod stmt;

use rustc_hash::FxHashMap;

use crate::common::error::CompileError;
use crate::common::types::Type;
use crate::frontend::ast::{FunctionDef, Item, Program};
use crate::ir::ir::{BasicBlock, GlobalVar, Inst, IrFunction, IrModule, Opcode, Operand};

/// Lower a program to memory-form IR.
pub fn lower(program: &Program) -> Result<IrModule, CompileError> {
    let mut lowering = Lowering::new();
    lowering.run(program)?;
    Ok(lowering.module)
}

pub(crate) struct Lowering {
    module: IrModule,
    cur_func: usize,
    cur_block: usize,
    /// Module-wide, so block labels stay unique across functions.
    label_counter: u32,
    /// Innermost scope last. Values are slot pointers (or global operands).
    scopes: Vec<FxHashMap<String, Operand>>,
    /// Deduplication map: literal bytes -> `@strN` name.
    string_map: FxHashMap<Vec<u8>, String>,
    /// Targets for `continue` (loop cond/step labels). Switches do not push
    /// here, only onto `break_labels`.
    continue_labels: Vec<String>,
    /// Targets for `break` (loop and switch end labels).
    break_labels: Vec<String>,
}

impl Lowering {
    fn new() -> Lowering {
        Lowering {
            module: IrModule::new(),
            cur_func: 0,
            cur_block: 0,
            label_counter: 0,
            scopes: Vec::new(),
            string_map: FxHashMap::default(),
            continue_labels: Vec::new(),
            break_labels: Vec::new(),
        }
    }

    fn run(&mut self, program: &Program) -> Result<(), CompileError> {
        // Pass 1: globals and function signatures, for forward references.
        for item in &program.items {
            match item {
                Item::Function(func) => {
                    let global_name = format!("@{}", func.name);
                    self.module
                        .symbol_table
                        .insert(func.name.clone(), Operand::global(global_name, func.return_type));
                }
                Item::Globals(list) => {
                    for decl in &list.decls {
                        if decl.ty.is_void() {
                            return Err(CompileError::TypeMisuse(format!(
                                "variable '{}' declared void",
                                decl.name
                            )));
                        }
                        let global_name = format!("@{}", decl.name);
                        self.module
                            .globals
                            .push(GlobalVar { name: global_name.clone(), ty: decl.ty });
                        self.module.symbol_table.insert(
                            decl.name.clone(),
                            Operand::global(global_name, Type::pointer_to(decl.ty)),
                        );
                    }
                }
            }
        }

        // Pass 2: function bodies.
        for item in &program.items {
            if let Item::Function(func) = item {
                self.lower_function(func)?;
            }
        }
        Ok(())
    }

    fn lower_function(&mut self, def: &FunctionDef) -> Result<(), CompileError> {
        let name = format!("@{}", def.name);
        self.module.functions.push(IrFunction::new(name, def.return_type));
        self.cur_func = self.module.functions.len() - 1;
        self.scopes.push(FxHashMap::default());

        let entry = self.fresh_label("entry");
        self.new_block(entry);

        // Each parameter gets a fresh register for the incoming value, a
        // stack slot, and a store of the value into the slot; the name binds
        // to the slot pointer.
        for param in &def.params {
            if param.ty.is_void() {
                return Err(CompileError::TypeMisuse(format!(
                    "parameter '{}' declared void",
                    param.name
                )));
            }
            let value = self.func().new_reg(param.ty);
            self.func().params.push(value.clone());
            let slot = self.func().new_reg_ptr(param.ty);
            self.emit(Inst::with_result(Opcode::Alloca, vec![], slot.clone()));
            self.emit(Inst::new(Opcode::Store, vec![value, slot.clone()]));
            self.bind(param.name.clone(), slot);
        }

        for stmt in &def.body {
            self.lower_stmt(stmt)?;
        }

        // Guarantee the function ends in a terminator.
        let needs_ret = {
            let cur_block = self.cur_block;
            let block = &self.func().blocks[cur_block];
            !block
                .insts
                .last()
                .is_some_and(|inst| matches!(inst.op, Opcode::Ret | Opcode::Br))
        };
        if needs_ret {
            let ret = if def.return_type.is_void() {
                Inst::new(Opcode::Ret, vec![])
            } else {
                Inst::new(Opcode::Ret, vec![Operand::imm(0, Type::i32())])
            };
            self.emit(ret);
        }

        self.scopes.pop();
        Ok(())
    }

    // ── builder state helpers ────────────────────────────────────────────

    pub(crate) fn func(&mut self) -> &mut IrFunction {
        &mut self.module.functions[self.cur_func]
    }

    pub(crate) fn emit(&mut self, inst: Inst) {
        let block = self.cur_block;
        self.func().blocks[block].insts.push(inst);
    }

    pub(crate) fn fresh_label(&mut self, prefix: &str) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        format!("{}{}", prefix, n)
    }

    /// Append a new block with the given label and make it current.
    pub(crate) fn new_block(&mut self, label: String) {
        self.func().blocks.push(BasicBlock::new(label));
        self.cur_block = self.func().blocks.len() - 1;
    }

    pub(crate) fn bind(&mut self, name: String, slot: Operand) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, slot);
        }
    }

    /// Resolve a name to its slot pointer (locals, innermost scope first)
    /// or global operand.
    pub(crate) fn lookup(&self, name: &str) -> Result<Operand, CompileError> {
        for scope in self.scopes.iter().rev() {
            if let Some(op) = scope.get(name) {
                return Ok(op.clone());
            }
        }
        self.module
            .symbol_table
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownSymbol(name.to_string()))
    }

    pub(crate) fn symbol(&self, name: &str) -> Option<&Operand> {
        self.module.symbol_table.get(name)
    }

    /// Intern a string literal, reusing the existing global on repeat use.
    pub(crate) fn string_literal(&mut self, bytes: &[u8]) -> Operand {
        if let Some(name) = self.string_map.get(bytes) {
            return Operand::global(name.clone(), Type::char_ptr());
        }
        let name = format!("@str{}", self.module.string_literals.len());
        self.string_map.insert(bytes.to_vec(), name.clone());
        self.module.string_literals.push((name.clone(), bytes.to_vec()));
        Operand::global(name, Type::char_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend;
    use crate::ir::ir::OperandKind;

    fn lower_source(source: &str) -> IrModule {
        lower(&frontend::parse(source).unwrap()).unwrap()
    }

    fn ops(func: &IrFunction) -> Vec<Opcode> {
        func.blocks.iter().flat_map(|b| b.insts.iter().map(|i| i.op)).collect()
    }

    #[test]
    fn params_get_slot_and_store() {
        let module = lower_source("int id(int x) { return x; }");
        let f = module.function("@id").unwrap();
        assert_eq!(f.params.len(), 1);
        let entry = &f.blocks[0];
        assert_eq!(entry.insts[1].op, Opcode::Alloca);
        assert_eq!(entry.insts[2].op, Opcode::Store);
        // return x loads from the slot
        assert!(ops(f).contains(&Opcode::Load));
    }

    #[test]
    fn missing_return_is_appended() {
        let module = lower_source("int main() { }");
        let f = module.function("@main").unwrap();
        let last = f.blocks.last().unwrap().insts.last().unwrap();
        assert_eq!(last.op, Opcode::Ret);
        assert_eq!(last.args[0].imm_value(), Some(0));

        let module = lower_source("void nop() { } int main() { return 0; }");
        let f = module.function("@nop").unwrap();
        let last = f.blocks.last().unwrap().insts.last().unwrap();
        assert_eq!(last.op, Opcode::Ret);
        assert!(last.args.is_empty());
    }

    #[test]
    fn while_loop_shape() {
        let module = lower_source("int main() { int i; i = 0; while (i < 3) i = i + 1; return i; }");
        let f = module.function("@main").unwrap();
        let labels: Vec<&str> = f.blocks.iter().map(|b| b.label.as_str()).collect();
        assert!(labels[0].starts_with("entry"));
        assert!(labels.iter().any(|l| l.starts_with("whilecond")));
        assert!(labels.iter().any(|l| l.starts_with("whilebody")));
        assert!(labels.iter().any(|l| l.starts_with("whileend")));
        // Condition block: TEST then BRLT then BR (both targets explicit).
        let cond = f
            .blocks
            .iter()
            .find(|b| b.label.starts_with("whilecond"))
            .unwrap();
        let kinds: Vec<Opcode> = cond.insts.iter().map(|i| i.op).collect();
        assert_eq!(
            kinds,
            vec![Opcode::Label, Opcode::Load, Opcode::Test, Opcode::Brlt, Opcode::Br]
        );
    }

    #[test]
    fn string_literals_are_deduplicated() {
        let module =
            lower_source("int main() { output \"hi\"; output \"hi\"; output \"yo\"; return 0; }");
        assert_eq!(module.string_literals.len(), 2);
        let f = module.function("@main").unwrap();
        let strs: Vec<&str> = f
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| i.op == Opcode::OutputStr)
            .filter_map(|i| i.args[0].global_name())
            .collect();
        assert_eq!(strs, vec!["@str0", "@str0", "@str1"]);
    }

    #[test]
    fn struct_member_uses_two_index_gep() {
        let module = lower_source(
            "struct LoweringPair { int a; int b; };\n\
             int main() { struct LoweringPair p; p.b = 4; return p.b; }",
        );
        let f = module.function("@main").unwrap();
        let gep = f
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .find(|i| i.op == Opcode::Gep)
            .expect("member access lowers to GEP");
        assert_eq!(gep.args.len(), 3);
        assert_eq!(gep.args[1].imm_value(), Some(0));
        assert_eq!(gep.args[2].imm_value(), Some(1));
    }

    #[test]
    fn array_rvalue_decays_to_first_element() {
        let module = lower_source("int first(int *p) { return p[0]; } int main() { int a[4]; return first(a); }");
        let f = module.function("@main").unwrap();
        // `a` as a call argument decays via GEP base, 0, 0
        let gep = f
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .find(|i| i.op == Opcode::Gep)
            .expect("array decay lowers to GEP");
        assert_eq!(gep.args[1].imm_value(), Some(0));
        assert_eq!(gep.args[2].imm_value(), Some(0));
    }

    #[test]
    fn comparison_outside_condition_is_rejected() {
        let program = frontend::parse("int main() { int a; a = 1 < 2; return 0; }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::TypeMisuse(_))));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let program = frontend::parse("int main() { break; return 0; }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::MalformedControlFlow(_))));
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let program = frontend::parse("int main() { return missing; }").unwrap();
        assert!(matches!(lower(&program), Err(CompileError::UnknownSymbol(_))));
    }

    #[test]
    fn switch_dispatch_is_a_test_chain() {
        let module = lower_source(
            "int main() { int v; v = 2; switch (v) { case 1: output 1; break; case 2: output 2; break; } return 0; }",
        );
        let f = module.function("@main").unwrap();
        // Dispatch lives at the end of the block where the switch value was
        // computed: TEST/BRZ per case, then BR to the end label.
        let dispatch = f
            .blocks
            .iter()
            .find(|b| b.insts.iter().filter(|i| i.op == Opcode::Test).count() == 2)
            .expect("dispatch block with two TESTs");
        let kinds: Vec<Opcode> = dispatch
            .insts
            .iter()
            .map(|i| i.op)
            .filter(|op| matches!(op, Opcode::Test | Opcode::Brz | Opcode::Br))
            .collect();
        assert_eq!(
            kinds,
            vec![Opcode::Test, Opcode::Brz, Opcode::Test, Opcode::Brz, Opcode::Br]
        );
    }

    #[test]
    fn global_variables_are_registered() {
        let module = lower_source("int g; int main() { g = 1; return g; }");
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.globals[0].name, "@g");
        let f = module.function("@main").unwrap();
        let store = f
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .find(|i| i.op == Opcode::Store)
            .unwrap();
        assert!(matches!(&store.args[1].kind, OperandKind::Global(n) if n == "@g"));
    }
}
