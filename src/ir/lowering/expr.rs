//! Expression and l-value lowering.
//!
//! Expressions produce an operand; l-values produce a pointer operand.
//! Array-typed values decay to a pointer to their first element via
//! `GEP base, 0, 0`; struct-typed r-values are rejected (no struct copy).

use crate::common::error::CompileError;
use crate::common::types::Type;
use crate::frontend::ast::{BinaryOp, Expr, UnaryOp};
use crate::ir::ir::{Inst, Opcode, Operand};

use super::Lowering;

impl Lowering {
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<Operand, CompileError> {
        match expr {
            Expr::IntLiteral(value) => Ok(Operand::imm(*value, Type::i32())),
            Expr::CharLiteral(value) => Ok(Operand::imm(*value, Type::i8())),
            Expr::StringLiteral(bytes) => Ok(self.string_literal(bytes)),
            Expr::Variable(_) | Expr::Index { .. } | Expr::Member { .. } => {
                let addr = self.lower_lvalue(expr)?;
                self.load_from(addr)
            }
            Expr::Assign { target, value } => {
                let value = self.lower_expr(value)?;
                let addr = self.lower_lvalue(target)?;
                self.emit(Inst::new(Opcode::Store, vec![value.clone(), addr]));
                Ok(value)
            }
            Expr::Binary { op, lhs, rhs } => {
                if op.is_comparison() {
                    return Err(CompileError::TypeMisuse(
                        "comparison operators are only valid as if/while/for conditions"
                            .to_string(),
                    ));
                }
                let opcode = match op {
                    BinaryOp::Add => Opcode::Add,
                    BinaryOp::Sub => Opcode::Sub,
                    BinaryOp::Mul => Opcode::Mul,
                    BinaryOp::Div => Opcode::Div,
                    _ => unreachable!("comparisons rejected above"),
                };
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                let result = self.func().new_reg(Type::i32());
                self.emit(Inst::with_result(opcode, vec![lhs, rhs], result.clone()));
                Ok(result)
            }
            Expr::Unary { op: UnaryOp::Addr, operand } => self.lower_lvalue(operand),
            Expr::Unary { op: UnaryOp::Deref, operand } => {
                let addr = self.lower_expr(operand)?;
                if !addr.ty.is_pointer() {
                    return Err(CompileError::TypeMisuse(
                        "cannot dereference a non-pointer value".to_string(),
                    ));
                }
                self.load_from(addr)
            }
            Expr::Call { name, args } => self.lower_call(name, args),
        }
    }

    fn lower_call(&mut self, name: &str, args: &[Expr]) -> Result<Operand, CompileError> {
        let callee = self
            .symbol(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownSymbol(name.to_string()))?;
        let return_type = callee.ty;
        let mut call_args = vec![callee];
        for arg in args {
            call_args.push(self.lower_expr(arg)?);
        }
        if return_type.is_void() {
            self.emit(Inst::new(Opcode::Call, call_args));
            // A void call has no value; the parser only allows it in
            // expression-statement position, so this operand is never read.
            Ok(Operand::imm(0, Type::i32()))
        } else {
            let result = self.func().new_reg(return_type);
            self.emit(Inst::with_result(Opcode::Call, call_args, result.clone()));
            Ok(result)
        }
    }

    /// Read an r-value through a pointer: arrays decay, structs are
    /// rejected, scalars load.
    fn load_from(&mut self, addr: Operand) -> Result<Operand, CompileError> {
        let pointee = addr
            .ty
            .pointee()
            .ok_or_else(|| CompileError::internal("l-value operand is not a pointer"))?;
        if pointee.is_array() {
            let element = pointee.element().expect("array has element type");
            let result = self.func().new_reg_ptr(element);
            self.emit(Inst::with_result(
                Opcode::Gep,
                vec![addr, Operand::imm(0, Type::i32()), Operand::imm(0, Type::i32())],
                result.clone(),
            ));
            return Ok(result);
        }
        if pointee.is_struct() {
            return Err(CompileError::TypeMisuse(
                "a struct value cannot be used as an r-value".to_string(),
            ));
        }
        let result = self.func().new_reg(pointee);
        self.emit(Inst::with_result(Opcode::Load, vec![addr], result.clone()));
        Ok(result)
    }

    /// Lower an expression to the address it denotes.
    pub(crate) fn lower_lvalue(&mut self, expr: &Expr) -> Result<Operand, CompileError> {
        match expr {
            Expr::Variable(name) => {
                let op = self.lookup(name)?;
                if !op.ty.is_pointer() {
                    return Err(CompileError::TypeMisuse(format!(
                        "'{}' is not an assignable location",
                        name
                    )));
                }
                Ok(op)
            }
            Expr::Unary { op: UnaryOp::Deref, operand } => {
                let addr = self.lower_expr(operand)?;
                if !addr.ty.is_pointer() {
                    return Err(CompileError::TypeMisuse(
                        "cannot dereference a non-pointer value".to_string(),
                    ));
                }
                Ok(addr)
            }
            Expr::Index { base, index } => self.lower_index_addr(base, index),
            Expr::Member { base, field } => {
                let addr = self.lower_lvalue(base)?;
                let base_ty = addr
                    .ty
                    .pointee()
                    .ok_or_else(|| CompileError::internal("member base is not a pointer"))?;
                if !base_ty.is_struct() {
                    return Err(CompileError::TypeMisuse(format!(
                        "member access on non-struct type {}",
                        base_ty
                    )));
                }
                let index = base_ty.field_index(field).ok_or_else(|| {
                    CompileError::UnknownSymbol(format!(
                        "field '{}' of {}",
                        field, base_ty
                    ))
                })?;
                let field_ty = base_ty.field_type(index).expect("field index is valid");
                let result = self.func().new_reg_ptr(field_ty);
                self.emit(Inst::with_result(
                    Opcode::Gep,
                    vec![
                        addr,
                        Operand::imm(0, Type::i32()),
                        Operand::imm(index as i32, Type::i32()),
                    ],
                    result.clone(),
                ));
                Ok(result)
            }
            _ => Err(CompileError::TypeMisuse("expression is not an l-value".to_string())),
        }
    }

    /// Address of `base[index]`. An array l-value indexes in place with the
    /// two-index GEP form; a pointer value is loaded first and indexed with
    /// a single scaled index.
    fn lower_index_addr(&mut self, base: &Expr, index: &Expr) -> Result<Operand, CompileError> {
        let is_lvalue_base = matches!(
            base,
            Expr::Variable(_)
                | Expr::Index { .. }
                | Expr::Member { .. }
                | Expr::Unary { op: UnaryOp::Deref, .. }
        );
        if is_lvalue_base {
            let addr = self.lower_lvalue(base)?;
            let pointee = addr
                .ty
                .pointee()
                .ok_or_else(|| CompileError::internal("index base is not a pointer"))?;
            if pointee.is_array() {
                let element = pointee.element().expect("array has element type");
                let index = self.lower_expr(index)?;
                let result = self.func().new_reg_ptr(element);
                self.emit(Inst::with_result(
                    Opcode::Gep,
                    vec![addr, Operand::imm(0, Type::i32()), index],
                    result.clone(),
                ));
                return Ok(result);
            }
            if pointee.is_pointer() {
                let loaded = self.load_from(addr)?;
                return self.index_pointer(loaded, index);
            }
            return Err(CompileError::TypeMisuse(format!(
                "cannot index a value of type {}",
                pointee
            )));
        }
        let pointer = self.lower_expr(base)?;
        if !pointer.ty.is_pointer() {
            return Err(CompileError::TypeMisuse(
                "cannot index a non-pointer value".to_string(),
            ));
        }
        self.index_pointer(pointer, index)
    }

    fn index_pointer(&mut self, pointer: Operand, index: &Expr) -> Result<Operand, CompileError> {
        let pointee = pointer
            .ty
            .pointee()
            .ok_or_else(|| CompileError::internal("index base is not a pointer"))?;
        let index = self.lower_expr(index)?;
        let result = self.func().new_reg_ptr(pointee);
        self.emit(Inst::with_result(Opcode::Gep, vec![pointer, index], result.clone()));
        Ok(result)
    }
}
