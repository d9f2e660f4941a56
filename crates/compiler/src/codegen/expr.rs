//! Expression lowering
//!
//! The `gen_expr` contract: emit code that leaves the value of the
//! expression in `A`. After a terminal arithmetic or logical opcode `F`
//! tracks `A`; after plain loads it does not, which is why branches are
//! always guarded with `OR 0` by the statement layer.

use super::{CodeGen, Helper};
use crate::ast::{BinaryOp, Expr, NodeId, SourceLocation, UnaryOp};
use crate::error::CompileError;
use crate::inst::{Op, Operand};
use crate::resolver::DeclKind;

/// Assignable storage: a VM variable slot or a VM parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Place {
    Var(u32),
    Param(u8),
}

impl CodeGen<'_> {
    pub(crate) fn gen_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::IntLit { value, .. } => {
                self.emit(Op::Lda, vec![Operand::Imm(*value)]);
                Ok(())
            }
            Expr::Ident { id, loc, .. } => {
                let decl_id = self.resolved.use_of(*id)?;
                if let DeclKind::EnumConst { value } = self.resolved.decl(decl_id).kind {
                    self.emit(Op::Lda, vec![Operand::Imm(value)]);
                    return Ok(());
                }
                let place = self.place_of(*id, *loc)?;
                self.emit_load_place(place);
                Ok(())
            }
            Expr::Unary { op, operand, .. } => {
                self.gen_expr(operand)?;
                match op {
                    UnaryOp::Plus => {}
                    UnaryOp::Neg => self.emit(Op::Neg, vec![]),
                    UnaryOp::BitNot => self.emit(Op::Xor, vec![Operand::Imm(-1)]),
                    UnaryOp::Not => {
                        let tag = self.request_helper(Helper::NotL)?;
                        self.emit(Op::Call, vec![Operand::Tag(tag)]);
                    }
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs, loc } => {
                if op.is_logical() {
                    self.gen_logical(*op, lhs, rhs)
                } else if op.is_comparison() {
                    self.gen_comparison(*op, lhs, rhs)
                } else {
                    self.gen_binary_arith(*op, lhs, rhs, *loc)
                }
            }
            Expr::Assign {
                op,
                target_id,
                value,
                loc,
                ..
            } => self.gen_assign(*op, *target_id, value, *loc),
            Expr::IncDec {
                target_id,
                increment,
                prefix,
                loc,
                ..
            } => self.gen_incdec(*target_id, *increment, *prefix, *loc, true),
            Expr::Call { .. } => self.gen_call(expr),
        }
    }

    /// Statement-position lowering: the value in `A` is discarded, so
    /// post-increment can skip its save/restore dance.
    pub(crate) fn gen_expr_discard(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::IncDec {
                target_id,
                increment,
                loc,
                ..
            } => self.gen_incdec(*target_id, *increment, true, *loc, false),
            _ => self.gen_expr(expr),
        }
    }

    // ---- operand classification -----------------------------------------

    /// A leaf operand can be used directly in an instruction: a literal,
    /// an enum constant, a variable, or a parameter.
    pub(crate) fn leaf_operand(&self, expr: &Expr) -> Result<Option<Operand>, CompileError> {
        match expr {
            Expr::IntLit { value, .. } => Ok(Some(Operand::Imm(*value))),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
                ..
            } => match operand.as_ref() {
                Expr::IntLit { value, .. } => Ok(Some(Operand::Imm(value.wrapping_neg()))),
                _ => Ok(None),
            },
            Expr::Ident { id, .. } => {
                let decl_id = self.resolved.use_of(*id)?;
                match &self.resolved.decl(decl_id).kind {
                    DeclKind::EnumConst { value } => Ok(Some(Operand::Imm(*value))),
                    DeclKind::Global { .. } | DeclKind::Local | DeclKind::FuncParam { .. } => {
                        Ok(Some(Operand::Var(self.alloc.slot(decl_id)?)))
                    }
                    DeclKind::ParamVar { index } => Ok(Some(Operand::Param(*index))),
                    DeclKind::Function { .. } | DeclKind::Api { .. } => Err(
                        CompileError::internal("function designator survived resolution"),
                    ),
                }
            }
            _ => Ok(None),
        }
    }

    /// Does evaluating this expression execute a user-function call?
    /// Those clobber the scratch slots (the callee's own expressions use
    /// them), so values held across one must be parked on the VM stack.
    pub(crate) fn contains_call(&self, expr: &Expr) -> Result<bool, CompileError> {
        match expr {
            Expr::IntLit { .. } | Expr::Ident { .. } | Expr::IncDec { .. } => Ok(false),
            Expr::Unary { operand, .. } => self.contains_call(operand),
            Expr::Binary { lhs, rhs, .. } => {
                Ok(self.contains_call(lhs)? || self.contains_call(rhs)?)
            }
            Expr::Assign { value, .. } => self.contains_call(value),
            Expr::Call {
                callee_id, args, ..
            } => {
                let decl_id = self.resolved.use_of(*callee_id)?;
                if matches!(self.resolved.decl(decl_id).kind, DeclKind::Function { .. }) {
                    return Ok(true);
                }
                for arg in args {
                    if self.contains_call(arg)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub(crate) fn place_of(
        &self,
        node: NodeId,
        _loc: SourceLocation,
    ) -> Result<Place, CompileError> {
        let decl_id = self.resolved.use_of(node)?;
        match &self.resolved.decl(decl_id).kind {
            DeclKind::Global { .. } | DeclKind::Local | DeclKind::FuncParam { .. } => {
                Ok(Place::Var(self.alloc.slot(decl_id)?))
            }
            DeclKind::ParamVar { index } => Ok(Place::Param(*index)),
            _ => Err(CompileError::internal(
                "non-object declaration used as storage",
            )),
        }
    }

    pub(crate) fn emit_load_place(&mut self, place: Place) {
        match place {
            Place::Var(slot) => self.emit(Op::Lda, vec![Operand::Var(slot)]),
            Place::Param(index) => self.emit(Op::Ldap, vec![Operand::Imm(index as i32)]),
        }
    }

    pub(crate) fn emit_store_place(&mut self, place: Place) {
        match place {
            Place::Var(slot) => self.emit(Op::Sta, vec![Operand::Var(slot)]),
            Place::Param(index) => self.emit(Op::Stap, vec![Operand::Imm(index as i32)]),
        }
    }

    // ---- binary operators ------------------------------------------------

    fn gen_binary_arith(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        loc: SourceLocation,
    ) -> Result<(), CompileError> {
        let vm_op = arith_op(op)?;

        // Leaf right operand: apply it directly against A.
        if let Some(operand) = self.leaf_operand(rhs)? {
            self.gen_expr(lhs)?;
            self.emit(vm_op, vec![operand]);
            return Ok(());
        }

        if self.contains_call(lhs)? {
            // The left side calls a function, which would clobber a
            // scratch-held right value; park it on the VM stack instead.
            self.gen_expr(rhs)?;
            self.emit(Op::Push, vec![]);
            self.gen_expr(lhs)?;
            let scratch = self.push_scratch(loc)?;
            self.emit(Op::Sta, vec![Operand::Var(scratch)]);
            self.emit(Op::Pop, vec![]);
            self.emit(Op::Sta, vec![Operand::Var(0)]);
            self.emit(Op::Lda, vec![Operand::Var(scratch)]);
            self.emit(vm_op, vec![Operand::Var(0)]);
            self.pop_scratch();
        } else {
            // Canonical order: right side into scratch, left into A.
            self.gen_expr(rhs)?;
            let scratch = self.push_scratch(loc)?;
            self.emit(Op::Sta, vec![Operand::Var(scratch)]);
            self.gen_expr(lhs)?;
            self.emit(vm_op, vec![Operand::Var(scratch)]);
            self.pop_scratch();
        }
        Ok(())
    }

    /// Comparisons call a helper with the left operand in `A` and the
    /// right in `v0`. The left value waits on the VM stack while the right
    /// side evaluates, so nesting and calls need no scratch slot.
    fn gen_comparison(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(), CompileError> {
        self.gen_expr(lhs)?;
        self.emit(Op::Push, vec![]);
        self.gen_expr(rhs)?;
        self.emit(Op::Sta, vec![Operand::Var(0)]);
        self.emit(Op::Pop, vec![]);
        let helper = match op {
            BinaryOp::Eq => Helper::Eq,
            BinaryOp::Ne => Helper::Ne,
            BinaryOp::Lt => Helper::Lt,
            BinaryOp::Le => Helper::Le,
            BinaryOp::Gt => Helper::Gt,
            BinaryOp::Ge => Helper::Ge,
            _ => return Err(CompileError::internal("non-comparison in gen_comparison")),
        };
        let tag = self.request_helper(helper)?;
        self.emit(Op::Call, vec![Operand::Tag(tag)]);
        Ok(())
    }

    /// Short-circuit `&&` / `||` lower through jumps and a merge tag; the
    /// kept side is normalised to 0/1 by `_BOOL` exactly as C99 demands.
    fn gen_logical(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(), CompileError> {
        let short_tag = self.fresh_tag();
        let end_tag = self.fresh_tag();
        self.gen_expr(lhs)?;
        self.emit(Op::Or, vec![Operand::Imm(0)]);
        let (jump, short_value) = match op {
            BinaryOp::LogAnd => (Op::Jz, 0),
            BinaryOp::LogOr => (Op::Jnz, 1),
            _ => return Err(CompileError::internal("non-logical in gen_logical")),
        };
        self.emit(jump, vec![Operand::Tag(short_tag.clone())]);
        self.gen_expr(rhs)?;
        let bool_tag = self.request_helper(Helper::Bool)?;
        self.emit(Op::Call, vec![Operand::Tag(bool_tag)]);
        self.emit(Op::Jmp, vec![Operand::Tag(end_tag.clone())]);
        self.define_tag(&short_tag)?;
        self.emit(Op::Lda, vec![Operand::Imm(short_value)]);
        self.define_tag(&end_tag)?;
        Ok(())
    }

    // ---- assignment and increment ---------------------------------------

    fn gen_assign(
        &mut self,
        op: Option<BinaryOp>,
        target_id: NodeId,
        value: &Expr,
        loc: SourceLocation,
    ) -> Result<(), CompileError> {
        let place = self.place_of(target_id, loc)?;
        match op {
            None => {
                self.gen_expr(value)?;
                self.emit_store_place(place);
            }
            Some(bin_op) => {
                let vm_op = arith_op(bin_op)?;
                if let Some(operand) = self.leaf_operand(value)? {
                    self.emit_load_place(place);
                    self.emit(vm_op, vec![operand]);
                    self.emit_store_place(place);
                } else {
                    // x OP= e evaluates e once; nothing after the store
                    // into scratch can clobber it, calls included.
                    self.gen_expr(value)?;
                    let scratch = self.push_scratch(loc)?;
                    self.emit(Op::Sta, vec![Operand::Var(scratch)]);
                    self.emit_load_place(place);
                    self.emit(vm_op, vec![Operand::Var(scratch)]);
                    self.emit_store_place(place);
                    self.pop_scratch();
                }
            }
        }
        // The assigned value stays in A for any enclosing expression.
        Ok(())
    }

    fn gen_incdec(
        &mut self,
        target_id: NodeId,
        increment: bool,
        prefix: bool,
        loc: SourceLocation,
        value_needed: bool,
    ) -> Result<(), CompileError> {
        let place = self.place_of(target_id, loc)?;
        let op = if increment { Op::Add } else { Op::Sub };
        if prefix || !value_needed {
            self.emit_load_place(place);
            self.emit(op, vec![Operand::Imm(1)]);
            self.emit_store_place(place);
            return Ok(());
        }
        // Post-increment in a value context: the old value is saved to
        // scratch and restored after the store.
        self.emit_load_place(place);
        let scratch = self.push_scratch(loc)?;
        self.emit(Op::Sta, vec![Operand::Var(scratch)]);
        self.emit(op, vec![Operand::Imm(1)]);
        self.emit_store_place(place);
        self.emit(Op::Lda, vec![Operand::Var(scratch)]);
        self.pop_scratch();
        Ok(())
    }

    // ---- calls -----------------------------------------------------------

    fn gen_call(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let Expr::Call {
            callee_id,
            args,
            loc,
            ..
        } = expr
        else {
            return Err(CompileError::internal("gen_call on a non-call"));
        };
        let decl_id = self.resolved.use_of(*callee_id)?;
        match self.resolved.decl(decl_id).kind.clone() {
            DeclKind::Function { .. } => self.gen_user_call(decl_id, args, *loc),
            DeclKind::Api { opcode, .. } => self.gen_api_call(&opcode, args, *loc),
            _ => Err(CompileError::internal("call to a non-function")),
        }
    }

    /// User calls write each argument into the callee's parameter slot,
    /// then `CALL` the function tag; the result comes back in `A`.
    ///
    /// Arguments whose evaluation itself calls a function are evaluated
    /// first and parked on the VM stack: a nested call may share slots
    /// with (or call into) the callee and would clobber already-stored
    /// argument values.
    fn gen_user_call(
        &mut self,
        callee: crate::resolver::DeclId,
        args: &[Expr],
        _loc: SourceLocation,
    ) -> Result<(), CompileError> {
        let params = self
            .resolved
            .fn_params
            .get(&callee)
            .cloned()
            .ok_or_else(|| CompileError::internal("callee has no parameter layout"))?;
        if params.len() != args.len() {
            return Err(CompileError::internal("arity mismatch survived resolution"));
        }

        let mut parked = Vec::new();
        for (index, arg) in args.iter().enumerate() {
            if self.contains_call(arg)? {
                parked.push(index);
                self.gen_expr(arg)?;
                self.emit(Op::Push, vec![]);
            }
        }
        for (index, arg) in args.iter().enumerate() {
            if parked.contains(&index) {
                continue;
            }
            self.gen_expr(arg)?;
            let slot = self.alloc.slot(params[index])?;
            self.emit(Op::Sta, vec![Operand::Var(slot)]);
        }
        for &index in parked.iter().rev() {
            self.emit(Op::Pop, vec![]);
            let slot = self.alloc.slot(params[index])?;
            self.emit(Op::Sta, vec![Operand::Var(slot)]);
        }

        let tag = self.resolved.decl(callee).name.clone();
        self.emit(Op::Call, vec![Operand::Tag(tag)]);
        Ok(())
    }

    /// API calls take their arguments as instruction operands: leaves go
    /// in directly, compound arguments are computed into scratch slots.
    fn gen_api_call(
        &mut self,
        opcode: &str,
        args: &[Expr],
        loc: SourceLocation,
    ) -> Result<(), CompileError> {
        let mut operands: Vec<Option<Operand>> = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.leaf_operand(arg)?);
        }
        let compound: Vec<usize> = (0..args.len())
            .filter(|&i| operands[i].is_none())
            .collect();

        // Evaluate compound arguments left to right onto the VM stack,
        // then unload into scratch just before the opcode; nothing can
        // clobber the slots in between.
        for &index in &compound {
            self.gen_expr(&args[index])?;
            self.emit(Op::Push, vec![]);
        }
        let mut claimed = 0;
        for &index in compound.iter().rev() {
            self.emit(Op::Pop, vec![]);
            let scratch = self.push_scratch(loc)?;
            claimed += 1;
            self.emit(Op::Sta, vec![Operand::Var(scratch)]);
            operands[index] = Some(Operand::Var(scratch));
        }

        let mut final_args = Vec::with_capacity(args.len());
        for operand in operands {
            final_args
                .push(operand.ok_or_else(|| CompileError::internal("unassigned API operand"))?);
        }
        self.emit(Op::Api(opcode.to_string()), final_args);
        for _ in 0..claimed {
            self.pop_scratch();
        }
        Ok(())
    }
}

fn arith_op(op: BinaryOp) -> Result<Op, CompileError> {
    Ok(match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::BitAnd => Op::And,
        BinaryOp::BitOr => Op::Or,
        BinaryOp::BitXor => Op::Xor,
        BinaryOp::Shl => Op::Shl,
        BinaryOp::Shr => Op::Shr,
        _ => {
            return Err(CompileError::internal(
                "comparison routed to arithmetic lowering",
            ));
        }
    })
}
