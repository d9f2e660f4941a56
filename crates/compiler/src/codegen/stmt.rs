//! Statement lowering and control flow
//!
//! Every conditional branch reads `F`, and `F` only tracks `A` after
//! arithmetic opcodes, so each condition is followed by `OR 0` before the
//! branch. The reducer deletes the `OR 0` wherever the condition's last
//! opcode already refreshed `F`.

use super::{CodeGen, LoopCtx};
use crate::ast::{AsmOperand, Expr, SourceLocation, Stmt};
use crate::error::CompileError;
use crate::inst::{Op, Operand};
use crate::resolver::DeclKind;

impl CodeGen<'_> {
    pub(crate) fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        if let Some(loc) = stmt.loc() {
            self.cur_loc = Some(loc);
        }
        match stmt {
            Stmt::Compound(stmts, _) => {
                for s in stmts {
                    self.gen_stmt(s)?;
                }
                Ok(())
            }
            Stmt::Expr(expr) => self.gen_expr_discard(expr),
            Stmt::Decl(vd) => {
                for declarator in &vd.vars {
                    let Some(init) = &declarator.init else {
                        continue; // uninitialised locals hold whatever the slot held
                    };
                    let decl_id =
                        self.resolved.def_ids.get(&declarator.id).copied().ok_or_else(|| {
                            CompileError::internal(format!(
                                "declarator '{}' was never resolved",
                                declarator.name
                            ))
                        })?;
                    self.gen_expr(init)?;
                    let slot = self.alloc.slot(decl_id)?;
                    self.emit(Op::Sta, vec![Operand::Var(slot)]);
                }
                Ok(())
            }
            Stmt::Enum(_) => Ok(()), // folded to constants during resolution
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let else_tag = self.fresh_tag();
                self.gen_condition(cond)?;
                self.emit(Op::Jz, vec![Operand::Tag(else_tag.clone())]);
                self.gen_stmt(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end_tag = self.fresh_tag();
                        self.emit(Op::Jmp, vec![Operand::Tag(end_tag.clone())]);
                        self.define_tag(&else_tag)?;
                        self.gen_stmt(else_branch)?;
                        self.define_tag(&end_tag)?;
                    }
                    None => {
                        self.define_tag(&else_tag)?;
                    }
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                let head_tag = self.fresh_tag();
                let end_tag = self.fresh_tag();
                self.define_tag(&head_tag)?;
                self.gen_condition(cond)?;
                self.emit(Op::Jz, vec![Operand::Tag(end_tag.clone())]);
                self.loops.push(LoopCtx {
                    break_tag: end_tag.clone(),
                    continue_tag: head_tag.clone(),
                });
                self.gen_stmt(body)?;
                self.loops.pop();
                self.emit(Op::Jmp, vec![Operand::Tag(head_tag)]);
                self.define_tag(&end_tag)?;
                Ok(())
            }
            Stmt::DoWhile { body, cond, .. } => {
                let head_tag = self.fresh_tag();
                let continue_tag = self.fresh_tag();
                let end_tag = self.fresh_tag();
                self.define_tag(&head_tag)?;
                self.loops.push(LoopCtx {
                    break_tag: end_tag.clone(),
                    continue_tag: continue_tag.clone(),
                });
                self.gen_stmt(body)?;
                self.loops.pop();
                self.define_tag(&continue_tag)?;
                self.gen_condition(cond)?;
                self.emit(Op::Jnz, vec![Operand::Tag(head_tag)]);
                self.define_tag(&end_tag)?;
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }
                let head_tag = self.fresh_tag();
                let continue_tag = self.fresh_tag();
                let end_tag = self.fresh_tag();
                self.define_tag(&head_tag)?;
                if let Some(cond) = cond {
                    // An absent condition is always true.
                    self.gen_condition(cond)?;
                    self.emit(Op::Jz, vec![Operand::Tag(end_tag.clone())]);
                }
                self.loops.push(LoopCtx {
                    break_tag: end_tag.clone(),
                    continue_tag: continue_tag.clone(),
                });
                self.gen_stmt(body)?;
                self.loops.pop();
                self.define_tag(&continue_tag)?;
                if let Some(step) = step {
                    self.gen_expr_discard(step)?;
                }
                self.emit(Op::Jmp, vec![Operand::Tag(head_tag)]);
                self.define_tag(&end_tag)?;
                Ok(())
            }
            Stmt::Break(_) => {
                let tag = self
                    .loops
                    .last()
                    .map(|ctx| ctx.break_tag.clone())
                    .ok_or_else(|| CompileError::internal("break survived resolution"))?;
                self.emit(Op::Jmp, vec![Operand::Tag(tag)]);
                Ok(())
            }
            Stmt::Continue(_) => {
                let tag = self
                    .loops
                    .last()
                    .map(|ctx| ctx.continue_tag.clone())
                    .ok_or_else(|| CompileError::internal("continue survived resolution"))?;
                self.emit(Op::Jmp, vec![Operand::Tag(tag)]);
                Ok(())
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.gen_expr(value)?;
                }
                self.emit(Op::Ret, vec![]);
                Ok(())
            }
            Stmt::Asm {
                mnemonic,
                operand,
                loc,
            } => self.gen_asm(mnemonic, operand.as_ref(), *loc),
            Stmt::Empty => Ok(()),
        }
    }

    /// Lower a branch condition and re-establish `F == A` before the
    /// branch that follows.
    fn gen_condition(&mut self, cond: &Expr) -> Result<(), CompileError> {
        self.gen_expr(cond)?;
        self.emit(Op::Or, vec![Operand::Imm(0)]);
        Ok(())
    }

    /// Inline asm: the mnemonic is copied verbatim (upper-cased); `"Tag"`
    /// defines a tag in the shared namespace. String operands naming a
    /// jump or call target become tag references so the reducer sees them.
    fn gen_asm(
        &mut self,
        mnemonic: &str,
        operand: Option<&AsmOperand>,
        loc: SourceLocation,
    ) -> Result<(), CompileError> {
        if mnemonic.eq_ignore_ascii_case("tag") {
            let Some(AsmOperand::Str(name)) = operand else {
                return Err(CompileError::asm(
                    "asm(\"Tag\", ...) needs a string tag name",
                    self.unit.loc_string(loc),
                ));
            };
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(CompileError::asm(
                    format!("'{}' is not a valid tag name", name),
                    self.unit.loc_string(loc),
                ));
            }
            return self.define_tag(name);
        }

        let op = Op::from_mnemonic(mnemonic);
        let args = match operand {
            None => Vec::new(),
            Some(AsmOperand::Int(value)) => vec![Operand::Imm(*value)],
            Some(AsmOperand::Str(text)) => {
                if text.is_empty() || text.chars().any(|c| c.is_whitespace()) {
                    return Err(CompileError::asm(
                        format!("'{}' is not a valid asm operand", text),
                        self.unit.loc_string(loc),
                    ));
                }
                if op.is_jump_or_call() {
                    vec![Operand::Tag(text.clone())]
                } else {
                    vec![Operand::Raw(text.clone())]
                }
            }
            Some(AsmOperand::Ident { id, .. }) => {
                let decl_id = self.resolved.use_of(*id)?;
                match &self.resolved.decl(decl_id).kind {
                    DeclKind::Global { .. } | DeclKind::Local | DeclKind::FuncParam { .. } => {
                        vec![Operand::Var(self.alloc.slot(decl_id)?)]
                    }
                    DeclKind::ParamVar { index } => vec![Operand::Param(*index)],
                    DeclKind::EnumConst { value } => vec![Operand::Imm(*value)],
                    _ => {
                        return Err(CompileError::asm(
                            "asm operand must name an object or constant",
                            self.unit.loc_string(loc),
                        ));
                    }
                }
            }
        };
        self.emit(op, args);
        Ok(())
    }
}
