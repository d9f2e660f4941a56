//! Constant expression folding
//!
//! Enumerator values and global initialisers must be compile-time
//! constants: integer literals, previously declared enum constants, and
//! the operators over them. Arithmetic wraps exactly the way the VM wraps
//! (32-bit two's complement) so a folded initialiser matches what the
//! same expression would compute at run time.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{CompileError, ErrorKind};

/// Fold `expr` to an `i32`. `env` resolves identifiers to known constant
/// values (enum constants); `loc_string` renders locations for errors.
pub fn fold(
    expr: &Expr,
    env: &dyn Fn(&str) -> Option<i32>,
    loc_string: &dyn Fn(&Expr) -> String,
) -> Result<i32, CompileError> {
    match expr {
        Expr::IntLit { value, .. } => Ok(*value),
        Expr::Ident { name, .. } => env(name).ok_or_else(|| {
            CompileError::ty(
                format!("'{}' is not usable in a constant expression", name),
                loc_string(expr),
            )
        }),
        Expr::Unary { op, operand, .. } => {
            let value = fold(operand, env, loc_string)?;
            Ok(match op {
                UnaryOp::Neg => value.wrapping_neg(),
                UnaryOp::Plus => value,
                UnaryOp::BitNot => !value,
                UnaryOp::Not => (value == 0) as i32,
            })
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            let a = fold(lhs, env, loc_string)?;
            // && and || short-circuit even when folding.
            match op {
                BinaryOp::LogAnd if a == 0 => return Ok(0),
                BinaryOp::LogOr if a != 0 => return Ok(1),
                _ => {}
            }
            let b = fold(rhs, env, loc_string)?;
            Ok(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div | BinaryOp::Mod => {
                    if b == 0 {
                        return Err(CompileError::ty(
                            "division by zero in constant expression",
                            loc_string(expr),
                        ));
                    }
                    if *op == BinaryOp::Div {
                        a.wrapping_div(b)
                    } else {
                        a.wrapping_rem(b)
                    }
                }
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::Shl => a.wrapping_shl(b as u32 & 31),
                BinaryOp::Shr => a >> (b as u32 & 31),
                BinaryOp::Lt => (a < b) as i32,
                BinaryOp::Le => (a <= b) as i32,
                BinaryOp::Gt => (a > b) as i32,
                BinaryOp::Ge => (a >= b) as i32,
                BinaryOp::Eq => (a == b) as i32,
                BinaryOp::Ne => (a != b) as i32,
                BinaryOp::LogAnd | BinaryOp::LogOr => (b != 0) as i32,
            })
        }
        Expr::Assign { .. } | Expr::IncDec { .. } | Expr::Call { .. } => Err(CompileError::at(
            ErrorKind::Type,
            "not a constant expression",
            loc_string(expr),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceLocation;

    fn lit(value: i32) -> Expr {
        Expr::IntLit {
            value,
            loc: SourceLocation { file: 0, line: 0 },
        }
    }

    fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            loc: SourceLocation { file: 0, line: 0 },
        }
    }

    fn eval(expr: &Expr) -> Result<i32, CompileError> {
        fold(expr, &|_| None, &|_| "test.c:1".to_string())
    }

    #[test]
    fn test_fold_arithmetic() {
        assert_eq!(eval(&bin(BinaryOp::Add, lit(3), lit(5))).unwrap(), 8);
        assert_eq!(eval(&bin(BinaryOp::Mul, lit(13), lit(11))).unwrap(), 143);
        assert_eq!(eval(&bin(BinaryOp::Mod, lit(73), lit(20))).unwrap(), 13);
    }

    #[test]
    fn test_fold_wraps_like_the_vm() {
        let expr = bin(BinaryOp::Add, lit(i32::MAX), lit(1));
        assert_eq!(eval(&expr).unwrap(), i32::MIN);
    }

    #[test]
    fn test_fold_unary_not() {
        let expr = Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(lit(0)),
            loc: SourceLocation { file: 0, line: 0 },
        };
        assert_eq!(eval(&expr).unwrap(), 1);
    }

    #[test]
    fn test_fold_short_circuit_skips_division() {
        // 0 && (1/0) folds to 0 without evaluating the division.
        let expr = bin(
            BinaryOp::LogAnd,
            lit(0),
            bin(BinaryOp::Div, lit(1), lit(0)),
        );
        assert_eq!(eval(&expr).unwrap(), 0);
    }

    #[test]
    fn test_fold_division_by_zero_is_an_error() {
        let err = eval(&bin(BinaryOp::Div, lit(1), lit(0))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_fold_env_lookup() {
        let expr = Expr::Ident {
            name: "GREEN".to_string(),
            id: 0,
            loc: SourceLocation { file: 0, line: 0 },
        };
        let env = |name: &str| (name == "GREEN").then_some(5);
        assert_eq!(fold(&expr, &env, &|_| String::new()).unwrap(), 5);
    }
}
