//! Code generation for the PIGS accumulator machine
//!
//! Lowers the resolved translation unit to a linear instruction list.
//!
//! # Program shape
//!
//! ```text
//! <global initialisers>        LDA k / STA vN per initialised global
//! CALL main
//! HALT
//! tag main                     one body per defined function, in order
//!   ...
//!   RET
//! tag _EQ                      helper routines, emitted only if used
//!   ...
//! ```
//!
//! # The F == A discipline
//!
//! The VM refreshes `F` only on arithmetic/logical opcodes, so whenever a
//! conditional branch consumes a freshly computed value the generator
//! inserts `OR 0` first. The reducer later deletes the insertion wherever
//! the preceding instruction already left `F == A`.
//!
//! # Scratch and the VM stack
//!
//! Compound right operands go through the three-slot scratch stack
//! `v1..v3` (deeper nesting is a `ScratchExhaustion` error). Values that
//! must survive a user `CALL` — callee bodies use the same scratch slots —
//! are parked on the VM stack with `PUSH`/`POP` instead. `v0` is the
//! right-hand operand of the comparison helpers.
//!
//! # Module structure
//!
//! - `expr.rs`: expression lowering (the `gen_expr` contract: value in `A`)
//! - `stmt.rs`: statement lowering, control flow, inline asm

mod expr;
mod stmt;

use crate::ast::{SourceLocation, TopDecl, TranslationUnit};
use crate::error::{CompileError, ErrorKind};
use crate::inst::{Inst, InstKind, Op, Operand};
use crate::resolver::{DeclId, Resolved};
use crate::slots::Allocation;
use std::collections::{BTreeSet, HashSet};

/// Built-in helper subroutines. Each reads `A` (and `v0` where binary),
/// leaves 0 or 1 in `A`, clobbers only `v0`, and ends with `RET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Helper {
    NotL,
    Bool,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Helper {
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Helper::NotL => "_NOTL",
            Helper::Bool => "_BOOL",
            Helper::Eq => "_EQ",
            Helper::Ne => "_NE",
            Helper::Lt => "_LT",
            Helper::Le => "_LE",
            Helper::Gt => "_GT",
            Helper::Ge => "_GE",
        }
    }
}

pub(crate) struct LoopCtx {
    pub break_tag: String,
    pub continue_tag: String,
}

pub struct CodeGen<'a> {
    pub(crate) unit: &'a TranslationUnit,
    pub(crate) resolved: &'a Resolved,
    pub(crate) alloc: &'a Allocation,
    insts: Vec<Inst>,
    defined_tags: HashSet<String>,
    next_tag: usize,
    scratch_depth: u32,
    pub(crate) loops: Vec<LoopCtx>,
    helpers: BTreeSet<Helper>,
    pub(crate) cur_loc: Option<SourceLocation>,
}

impl<'a> CodeGen<'a> {
    /// Policy switch for helper-routine emission. A future VM with native
    /// comparison opcodes would flip this and lower comparisons directly.
    const HELPERS_ENABLED: bool = true;

    pub fn new(unit: &'a TranslationUnit, resolved: &'a Resolved, alloc: &'a Allocation) -> Self {
        CodeGen {
            unit,
            resolved,
            alloc,
            insts: Vec::new(),
            defined_tags: HashSet::new(),
            next_tag: 0,
            scratch_depth: 0,
            loops: Vec::new(),
            helpers: BTreeSet::new(),
            cur_loc: None,
        }
    }

    /// Lower the whole unit.
    pub fn generate(mut self) -> Result<Vec<Inst>, CompileError> {
        self.gen_global_initialisers()?;

        self.cur_loc = None;
        let main_tag = self.resolved.decl(self.resolved.main).name.clone();
        self.emit(Op::Call, vec![Operand::Tag(main_tag)]);
        self.emit(Op::Halt, vec![]);

        for &(decl_id, index) in &self.resolved.functions {
            let TopDecl::Function(f) = &self.unit.decls[index] else {
                return Err(CompileError::internal("function index out of sync"));
            };
            self.gen_function(decl_id, f)?;
        }

        self.emit_helpers()?;
        Ok(self.insts)
    }

    fn gen_global_initialisers(&mut self) -> Result<(), CompileError> {
        use crate::resolver::DeclKind;
        for (id, decl) in self.resolved.decls.iter().enumerate() {
            if let DeclKind::Global { init: Some(value) } = decl.kind {
                self.cur_loc = Some(decl.loc);
                let slot = self.alloc.slot(id)?;
                self.emit(Op::Lda, vec![Operand::Imm(value)]);
                self.emit(Op::Sta, vec![Operand::Var(slot)]);
            }
        }
        Ok(())
    }

    fn gen_function(
        &mut self,
        decl_id: DeclId,
        f: &crate::ast::FunctionDef,
    ) -> Result<(), CompileError> {
        self.cur_loc = Some(f.loc);
        let name = self.resolved.decl(decl_id).name.clone();
        self.define_tag(&name)?;
        for stmt in &f.body {
            self.gen_stmt(stmt)?;
        }
        // Implicit return; for int functions the value in A is undefined,
        // which C permits when the caller ignores it.
        if !matches!(
            self.insts.last().map(|i| &i.kind),
            Some(InstKind::Op { op: Op::Ret, .. })
        ) {
            self.emit(Op::Ret, vec![]);
        }
        if self.scratch_depth != 0 {
            return Err(CompileError::internal(format!(
                "scratch stack not empty after '{}'",
                name
            )));
        }
        Ok(())
    }

    // ---- instruction plumbing -------------------------------------------

    pub(crate) fn emit(&mut self, op: Op, args: Vec<Operand>) {
        self.insts.push(Inst::op(op, args).with_loc(self.cur_loc));
    }

    /// Define a tag at the current position. The namespace is shared
    /// between generated tags, function tags, helper tags, and inline-asm
    /// tags; any duplicate is a collision error.
    pub(crate) fn define_tag(&mut self, name: &str) -> Result<(), CompileError> {
        if !self.defined_tags.insert(name.to_string()) {
            let message = format!("duplicate tag '{}'", name);
            return Err(match self.cur_loc {
                Some(loc) => CompileError::at(
                    ErrorKind::TagCollision,
                    message,
                    self.unit.loc_string(loc),
                ),
                None => CompileError::new(ErrorKind::TagCollision, message),
            });
        }
        self.insts.push(Inst::tag(name).with_loc(self.cur_loc));
        Ok(())
    }

    /// Next generated tag name (`_L0`, `_L1`, ...), skipping names an
    /// inline-asm tag already claimed.
    pub(crate) fn fresh_tag(&mut self) -> String {
        loop {
            let name = format!("_L{}", self.next_tag);
            self.next_tag += 1;
            if !self.defined_tags.contains(&name) {
                return name;
            }
        }
    }

    /// Record that a helper is needed and return its tag.
    pub(crate) fn request_helper(&mut self, helper: Helper) -> Result<String, CompileError> {
        if !Self::HELPERS_ENABLED {
            return Err(CompileError::internal(
                "helper routines requested but disabled",
            ));
        }
        self.helpers.insert(helper);
        Ok(helper.tag().to_string())
    }

    // ---- scratch stack ---------------------------------------------------

    /// Claim the next scratch slot (`v1..v3`).
    pub(crate) fn push_scratch(&mut self, loc: SourceLocation) -> Result<u32, CompileError> {
        if self.scratch_depth >= 3 {
            return Err(CompileError::at(
                ErrorKind::ScratchExhaustion,
                "expression nesting exceeds the three scratch slots; split it with a temporary",
                self.unit.loc_string(loc),
            ));
        }
        self.scratch_depth += 1;
        Ok(self.scratch_depth)
    }

    pub(crate) fn pop_scratch(&mut self) {
        debug_assert!(self.scratch_depth > 0);
        self.scratch_depth -= 1;
    }

    // ---- helper routines -------------------------------------------------

    fn emit_helpers(&mut self) -> Result<(), CompileError> {
        self.cur_loc = None;
        for helper in self.helpers.clone() {
            match helper {
                Helper::NotL => self.emit_truth_helper(helper, 0, 1)?,
                Helper::Bool => self.emit_truth_helper(helper, 1, 0)?,
                Helper::Eq => self.emit_zero_test_helper(helper, 1, 0)?,
                Helper::Ne => self.emit_zero_test_helper(helper, 0, 1)?,
                Helper::Lt => self.emit_sign_helper(helper, false, false)?,
                Helper::Ge => self.emit_sign_helper(helper, false, true)?,
                Helper::Gt => self.emit_sign_helper(helper, true, false)?,
                Helper::Le => self.emit_sign_helper(helper, true, true)?,
            }
        }
        Ok(())
    }

    /// `_BOOL` / `_NOTL`: normalise truthiness of `A`.
    fn emit_truth_helper(
        &mut self,
        helper: Helper,
        nonzero: i32,
        zero: i32,
    ) -> Result<(), CompileError> {
        let zero_tag = format!("{}_Z", helper.tag());
        self.define_tag(helper.tag())?;
        self.emit(Op::Or, vec![Operand::Imm(0)]);
        self.emit(Op::Jz, vec![Operand::Tag(zero_tag.clone())]);
        self.emit(Op::Lda, vec![Operand::Imm(nonzero)]);
        self.emit(Op::Ret, vec![]);
        self.define_tag(&zero_tag)?;
        self.emit(Op::Lda, vec![Operand::Imm(zero)]);
        self.emit(Op::Ret, vec![]);
        Ok(())
    }

    /// `_EQ` / `_NE`: `A` vs `v0` via the zero test of their difference.
    fn emit_zero_test_helper(
        &mut self,
        helper: Helper,
        equal: i32,
        unequal: i32,
    ) -> Result<(), CompileError> {
        let equal_tag = format!("{}_T", helper.tag());
        self.define_tag(helper.tag())?;
        self.emit(Op::Sub, vec![Operand::Var(0)]);
        self.emit(Op::Jz, vec![Operand::Tag(equal_tag.clone())]);
        self.emit(Op::Lda, vec![Operand::Imm(unequal)]);
        self.emit(Op::Ret, vec![]);
        self.define_tag(&equal_tag)?;
        self.emit(Op::Lda, vec![Operand::Imm(equal)]);
        self.emit(Op::Ret, vec![]);
        Ok(())
    }

    /// `_LT`/`_GE`/`_GT`/`_LE`: sign of the (possibly negated) difference,
    /// extracted with an arithmetic shift. `negate` swaps the operand
    /// order, `invert` flips the result.
    fn emit_sign_helper(
        &mut self,
        helper: Helper,
        negate: bool,
        invert: bool,
    ) -> Result<(), CompileError> {
        self.define_tag(helper.tag())?;
        self.emit(Op::Sub, vec![Operand::Var(0)]);
        if negate {
            self.emit(Op::Neg, vec![]);
        }
        self.emit(Op::Shr, vec![Operand::Imm(31)]);
        self.emit(Op::And, vec![Operand::Imm(1)]);
        if invert {
            self.emit(Op::Xor, vec![Operand::Imm(1)]);
        }
        self.emit(Op::Ret, vec![]);
        Ok(())
    }
}
