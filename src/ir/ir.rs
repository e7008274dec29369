//! The typed intermediate representation.
//!
//! An `IrModule` owns functions, globals and string literals. Functions own
//! basic blocks; each block starts with a `Label` pseudo-instruction and,
//! once the CFG has been built, ends with a terminator. Cross-references
//! (successors, predecessors, dominator links, def-use maps) are derived
//! state: they are numeric indices into the owning function's block vector
//! and are only valid until the next pass that adds or removes blocks or
//! instructions rebuilds them.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

use crate::common::types::Type;

/// What an operand denotes. Registers are `%N` with a per-function counter;
/// labels are block names like `whilecond7`; globals are `@`-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    Imm(i32),
    Reg(String),
    Label(String),
    Global(String),
}

/// An operand: a kind plus a type. The type is never "missing"; label
/// operands carry `void`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub ty: Type,
}

impl Operand {
    pub fn imm(value: i32, ty: Type) -> Operand {
        Operand { kind: OperandKind::Imm(value), ty }
    }

    pub fn reg(name: String, ty: Type) -> Operand {
        Operand { kind: OperandKind::Reg(name), ty }
    }

    pub fn label(name: String) -> Operand {
        Operand { kind: OperandKind::Label(name), ty: Type::void() }
    }

    pub fn global(name: String, ty: Type) -> Operand {
        Operand { kind: OperandKind::Global(name), ty }
    }

    pub fn is_reg(&self) -> bool {
        matches!(self.kind, OperandKind::Reg(_))
    }

    pub fn reg_name(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Reg(name) => Some(name),
            _ => None,
        }
    }

    pub fn label_name(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Label(name) => Some(name),
            _ => None,
        }
    }

    pub fn global_name(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Global(name) => Some(name),
            _ => None,
        }
    }

    pub fn imm_value(&self) -> Option<i32> {
        match self.kind {
            OperandKind::Imm(value) => Some(value),
            _ => None,
        }
    }
}

/// The fixed opcode set. `Label` is a pseudo-instruction marking the start
/// of every block; `Test` sets the hidden VM flags (LHS - RHS) consumed by
/// the conditional branches that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Ret,
    Br,
    Brz,
    Brlt,
    Brgt,
    Test,
    Alloca,
    Load,
    Store,
    Gep,
    Move,
    Add,
    Sub,
    Mul,
    Div,
    Call,
    InputI32,
    InputI8,
    OutputI32,
    OutputI8,
    OutputStr,
    Label,
    Phi,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Ret | Opcode::Br | Opcode::Brz | Opcode::Brlt | Opcode::Brgt)
    }

    pub fn is_cond_branch(self) -> bool {
        matches!(self, Opcode::Brz | Opcode::Brlt | Opcode::Brgt)
    }

    pub fn is_arith(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
    }
}

/// One instruction: an opcode, an ordered argument list, and a result
/// operand iff the opcode produces a value. `Phi` arguments interleave
/// `(value, predecessor_label)` pairs.
#[derive(Debug, Clone)]
pub struct Inst {
    pub op: Opcode,
    pub args: Vec<Operand>,
    pub result: Option<Operand>,
}

impl Inst {
    pub fn new(op: Opcode, args: Vec<Operand>) -> Inst {
        Inst { op, args, result: None }
    }

    pub fn with_result(op: Opcode, args: Vec<Operand>, result: Operand) -> Inst {
        Inst { op, args, result: Some(result) }
    }

    pub fn result_reg(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.reg_name())
    }
}

/// Position of an instruction inside its function. Stable as long as no
/// instruction is inserted or removed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstRef {
    pub block: usize,
    pub inst: usize,
}

/// A basic block: a unique label, instructions (starting with `Label`), and
/// the analysis fields filled in by the CFG/dominator passes.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: String,
    pub insts: Vec<Inst>,

    // Derived by the CFG pass: block indices, no duplicates.
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,

    // Derived by the dominator passes. `idom` is `None` for the entry block.
    pub idom: Option<usize>,
    pub dom_children: Vec<usize>,
    pub dom_frontier: BTreeSet<usize>,
}

impl BasicBlock {
    /// Create a block whose first instruction is its `Label`.
    pub fn new(label: String) -> BasicBlock {
        let label_inst = Inst::new(Opcode::Label, vec![Operand::label(label.clone())]);
        BasicBlock {
            label,
            insts: vec![label_inst],
            succs: Vec::new(),
            preds: Vec::new(),
            idom: None,
            dom_children: Vec::new(),
            dom_frontier: BTreeSet::new(),
        }
    }

    /// Index of the first terminator instruction (the head of the
    /// `Test`/branch chain ending the block), if any.
    pub fn terminator_index(&self) -> Option<usize> {
        self.insts.iter().position(|inst| inst.op.is_terminator())
    }

    /// The phi instructions sitting between the label and the body.
    pub fn phi_range(&self) -> std::ops::Range<usize> {
        let mut end = 1;
        while end < self.insts.len() && self.insts[end].op == Opcode::Phi {
            end += 1;
        }
        1..end
    }
}

/// A function: parameters (SSA registers), blocks (first is the entry), a
/// fresh-register counter, and derived lookup maps.
#[derive(Debug)]
pub struct IrFunction {
    /// `@`-prefixed name, e.g. `@main`.
    pub name: String,
    pub return_type: Type,
    pub params: Vec<Operand>,
    pub blocks: Vec<BasicBlock>,
    pub next_reg: u32,

    // Derived by the def-use pass (label_index also by the CFG pass).
    pub label_index: FxHashMap<String, usize>,
    pub def_site: FxHashMap<String, InstRef>,
    pub use_sites: FxHashMap<String, Vec<InstRef>>,
}

impl IrFunction {
    pub fn new(name: String, return_type: Type) -> IrFunction {
        IrFunction {
            name,
            return_type,
            params: Vec::new(),
            blocks: Vec::new(),
            next_reg: 0,
            label_index: FxHashMap::default(),
            def_site: FxHashMap::default(),
            use_sites: FxHashMap::default(),
        }
    }

    /// Mint a fresh SSA register of the given type.
    pub fn new_reg(&mut self, ty: Type) -> Operand {
        let name = format!("%{}", self.next_reg);
        self.next_reg += 1;
        Operand::reg(name, ty)
    }

    /// Mint a fresh SSA register holding a pointer to `pointee`.
    pub fn new_reg_ptr(&mut self, pointee: Type) -> Operand {
        self.new_reg(Type::pointer_to(pointee))
    }
}

/// A global scalar or aggregate variable, zero-initialized in the data
/// segment.
#[derive(Debug)]
pub struct GlobalVar {
    /// `@`-prefixed name.
    pub name: String,
    pub ty: Type,
}

/// A translation unit.
#[derive(Debug, Default)]
pub struct IrModule {
    pub functions: Vec<IrFunction>,
    pub globals: Vec<GlobalVar>,
    /// Deduplicated string literals: (`@strN`, raw bytes without terminator).
    pub string_literals: Vec<(String, Vec<u8>)>,
    /// Source name -> global operand. Function entries carry the return type;
    /// variable entries carry a pointer to the variable's type.
    pub symbol_table: FxHashMap<String, Operand>,
}

impl IrModule {
    pub fn new() -> IrModule {
        IrModule::default()
    }

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}
