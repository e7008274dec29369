//! Statement and condition lowering.

use std::collections::BTreeMap;

use crate::common::error::CompileError;
use crate::common::types::Type;
use crate::frontend::ast::{BinaryOp, Expr, Stmt, SwitchItem, VarDeclList};
use crate::ir::ir::{Inst, Opcode, Operand};

use super::Lowering;

impl Lowering {
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Compound(stmts) => self.lower_body(stmts),
            Stmt::VarDecls(list) => self.lower_var_decls(list),
            Stmt::If { cond, then_body, else_body } => self.lower_if(cond, then_body, else_body.as_deref()),
            Stmt::While { cond, body } => self.lower_while(cond, body),
            Stmt::For { init, cond, step, body } => {
                self.lower_for(init.as_deref(), cond.as_ref(), step.as_ref(), body)
            }
            Stmt::Switch { value, body } => self.lower_switch(value, body),
            Stmt::Return(value) => {
                let args = match value {
                    Some(expr) => vec![self.lower_expr(expr)?],
                    None => vec![],
                };
                self.emit(Inst::new(Opcode::Ret, args));
                let dead = self.fresh_label("dead");
                self.new_block(dead);
                Ok(())
            }
            Stmt::Break => {
                let target = self
                    .break_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::MalformedControlFlow(
                            "break outside of loop or switch".to_string(),
                        )
                    })?;
                self.emit(Inst::new(Opcode::Br, vec![Operand::label(target)]));
                let dead = self.fresh_label("dead");
                self.new_block(dead);
                Ok(())
            }
            Stmt::Continue => {
                let target = self
                    .continue_labels
                    .last()
                    .cloned()
                    .ok_or_else(|| {
                        CompileError::MalformedControlFlow("continue outside of loop".to_string())
                    })?;
                self.emit(Inst::new(Opcode::Br, vec![Operand::label(target)]));
                let dead = self.fresh_label("dead");
                self.new_block(dead);
                Ok(())
            }
            Stmt::Input(target) => self.lower_input(target),
            Stmt::Output(value) => self.lower_output(value),
            Stmt::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
        }
    }

    /// Lower a statement list in its own scope.
    pub(crate) fn lower_body(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.scopes.push(Default::default());
        let result = stmts.iter().try_for_each(|s| self.lower_stmt(s));
        self.scopes.pop();
        result
    }

    fn lower_var_decls(&mut self, list: &VarDeclList) -> Result<(), CompileError> {
        for decl in &list.decls {
            if decl.ty.is_void() {
                return Err(CompileError::TypeMisuse(format!(
                    "variable '{}' declared void",
                    decl.name
                )));
            }
            let slot = self.func().new_reg_ptr(decl.ty);
            self.emit(Inst::with_result(Opcode::Alloca, vec![], slot.clone()));
            self.bind(decl.name.clone(), slot.clone());
            if let Some(init) = &decl.init {
                let value = self.lower_expr(init)?;
                self.emit(Inst::new(Opcode::Store, vec![value, slot]));
            }
        }
        Ok(())
    }

    /// Lower a condition, branching to `true_label` or `false_label`. Both
    /// targets are emitted explicitly: a native branch plus an unconditional
    /// `BR`, with the negated native branch for `<=`, `>=` and `!=`. The
    /// current block ends here.
    pub(crate) fn lower_cond(
        &mut self,
        cond: &Expr,
        true_label: &str,
        false_label: &str,
    ) -> Result<(), CompileError> {
        let t = || Operand::label(true_label.to_string());
        let f = || Operand::label(false_label.to_string());

        if let Expr::Binary { op, lhs, rhs } = cond {
            if op.is_comparison() {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                self.emit(Inst::new(Opcode::Test, vec![lhs, rhs]));
                let (branch, on_true) = match op {
                    BinaryOp::Lt => (Opcode::Brlt, true),
                    BinaryOp::Gt => (Opcode::Brgt, true),
                    BinaryOp::Eq => (Opcode::Brz, true),
                    // No native branch: branch on the negation to the false
                    // label, then fall to the true label.
                    BinaryOp::Le => (Opcode::Brgt, false),
                    BinaryOp::Ge => (Opcode::Brlt, false),
                    BinaryOp::Ne => (Opcode::Brz, false),
                    _ => unreachable!("is_comparison"),
                };
                if on_true {
                    self.emit(Inst::new(branch, vec![t()]));
                    self.emit(Inst::new(Opcode::Br, vec![f()]));
                } else {
                    self.emit(Inst::new(branch, vec![f()]));
                    self.emit(Inst::new(Opcode::Br, vec![t()]));
                }
                return Ok(());
            }
        }

        // Any other expression: nonzero is true.
        let value = self.lower_expr(cond)?;
        self.emit(Inst::new(Opcode::Test, vec![value, Operand::imm(0, Type::i32())]));
        self.emit(Inst::new(Opcode::Brz, vec![f()]));
        self.emit(Inst::new(Opcode::Br, vec![t()]));
        Ok(())
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_body: &[Stmt],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        let then_label = self.fresh_label("ifthen");
        let end_label = self.fresh_label("ifend");
        let else_label = if else_body.is_some() {
            self.fresh_label("ifelse")
        } else {
            end_label.clone()
        };

        self.lower_cond(cond, &then_label, &else_label)?;

        self.new_block(then_label);
        self.lower_body(then_body)?;
        self.emit(Inst::new(Opcode::Br, vec![Operand::label(end_label.clone())]));

        if let Some(else_body) = else_body {
            self.new_block(else_label);
            self.lower_body(else_body)?;
            self.emit(Inst::new(Opcode::Br, vec![Operand::label(end_label.clone())]));
        }

        self.new_block(end_label);
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CompileError> {
        let cond_label = self.fresh_label("whilecond");
        let body_label = self.fresh_label("whilebody");
        let end_label = self.fresh_label("whileend");

        self.continue_labels.push(cond_label.clone());
        self.break_labels.push(end_label.clone());

        self.emit(Inst::new(Opcode::Br, vec![Operand::label(cond_label.clone())]));
        self.new_block(cond_label.clone());
        self.lower_cond(cond, &body_label, &end_label)?;

        self.new_block(body_label);
        self.lower_body(body)?;
        self.emit(Inst::new(Opcode::Br, vec![Operand::label(cond_label)]));

        self.new_block(end_label);
        self.continue_labels.pop();
        self.break_labels.pop();
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        let cond_label = self.fresh_label("forcond");
        let body_label = self.fresh_label("forbody");
        let step_label = self.fresh_label("forstep");
        let end_label = self.fresh_label("forend");

        // A `for` init declaration scopes over the whole loop.
        self.scopes.push(Default::default());
        if let Some(init) = init {
            self.lower_stmt(init)?;
        }

        // `continue` jumps to the step block, not the condition.
        self.continue_labels.push(step_label.clone());
        self.break_labels.push(end_label.clone());

        self.emit(Inst::new(Opcode::Br, vec![Operand::label(cond_label.clone())]));
        self.new_block(cond_label.clone());
        match cond {
            Some(cond) => self.lower_cond(cond, &body_label, &end_label)?,
            None => self.emit(Inst::new(Opcode::Br, vec![Operand::label(body_label.clone())])),
        }

        self.new_block(body_label);
        self.lower_body(body)?;
        self.emit(Inst::new(Opcode::Br, vec![Operand::label(step_label.clone())]));

        self.new_block(step_label);
        if let Some(step) = step {
            self.lower_expr(step)?;
        }
        self.emit(Inst::new(Opcode::Br, vec![Operand::label(cond_label)]));

        self.new_block(end_label);
        self.continue_labels.pop();
        self.break_labels.pop();
        self.scopes.pop();
        Ok(())
    }

    fn lower_switch(&mut self, value: &Expr, body: &[SwitchItem]) -> Result<(), CompileError> {
        let end_label = self.fresh_label("switchend");
        self.break_labels.push(end_label.clone());

        let switch_val = self.lower_expr(value)?;

        // First pass: assign a label to each statement block and map case
        // values to the block that follows them (fall-through cases share
        // the next block's label).
        let mut block_labels: Vec<String> = Vec::new();
        let mut case_targets: BTreeMap<i32, usize> = BTreeMap::new();
        let mut default_target: Option<usize> = None;
        let mut block_count = 0usize;
        for item in body {
            match item {
                SwitchItem::Case(v) => {
                    case_targets.entry(*v).or_insert(block_count);
                }
                SwitchItem::Default => {
                    if default_target.is_none() {
                        default_target = Some(block_count);
                    }
                }
                SwitchItem::Block(_) => {
                    block_labels.push(self.fresh_label("switchcase"));
                    block_count += 1;
                }
            }
        }

        // Dispatch chain: TEST value against each case constant, branching
        // on equality; fall through to the default (or the end).
        let label_for = |idx: usize, labels: &[String], end: &str| -> String {
            labels.get(idx).cloned().unwrap_or_else(|| end.to_string())
        };
        for (&case_value, &target) in &case_targets {
            self.emit(Inst::new(
                Opcode::Test,
                vec![switch_val.clone(), Operand::imm(case_value, Type::i32())],
            ));
            let target_label = label_for(target, &block_labels, &end_label);
            self.emit(Inst::new(Opcode::Brz, vec![Operand::label(target_label)]));
        }
        let fallback = match default_target {
            Some(idx) => label_for(idx, &block_labels, &end_label),
            None => end_label.clone(),
        };
        self.emit(Inst::new(Opcode::Br, vec![Operand::label(fallback)]));

        // Second pass: emit each statement block at its assigned label.
        // A block that does not branch falls through to the next case block.
        let mut block_index = 0usize;
        for item in body {
            if let SwitchItem::Block(stmts) = item {
                self.new_block(block_labels[block_index].clone());
                self.lower_body(stmts)?;
                block_index += 1;
            }
        }

        self.new_block(end_label);
        self.break_labels.pop();
        Ok(())
    }

    fn lower_input(&mut self, target: &Expr) -> Result<(), CompileError> {
        let addr = self.lower_lvalue(target)?;
        let pointee = addr
            .ty
            .pointee()
            .ok_or_else(|| CompileError::internal("input target has no pointer type"))?;
        let op = if pointee.is_int() {
            Opcode::InputI32
        } else if pointee.is_char() {
            Opcode::InputI8
        } else {
            return Err(CompileError::TypeMisuse(
                "input target must be of int or char type".to_string(),
            ));
        };
        let result = self.func().new_reg(pointee);
        self.emit(Inst::with_result(op, vec![], result.clone()));
        self.emit(Inst::new(Opcode::Store, vec![result, addr]));
        Ok(())
    }

    fn lower_output(&mut self, value: &Expr) -> Result<(), CompileError> {
        let operand = self.lower_expr(value)?;
        let op = if operand.ty.is_int() {
            Opcode::OutputI32
        } else if operand.ty.is_char() {
            Opcode::OutputI8
        } else if operand.ty.pointee().is_some_and(|p| p.is_char()) {
            Opcode::OutputStr
        } else {
            return Err(CompileError::TypeMisuse(
                "output value must be an int, char, or string".to_string(),
            ));
        };
        self.emit(Inst::new(op, vec![operand]));
        Ok(())
    }
}
