//! Peephole reducer
//!
//! Removes provably redundant instructions from the generated stream.
//! Rules (each semantics-preserving under the `F == A` discipline), run
//! to a fixed point:
//!
//! 1. `STA x; LDA x` → `STA x` (same for `STAP`/`LDAP`): `A` already
//!    holds the value.
//! 2. two adjacent pure loads: the first has no observer, drop it.
//! 3. `JMP L` immediately followed by `tag L`: drop the jump.
//! 4. drop tags no instruction references (verbatim inline-asm operands
//!    count as references).
//! 5. drop `OR 0` not followed by a conditional branch within its basic
//!    block (only stores may stand between; anything whose flag use we
//!    cannot see keeps the instruction).
//! 6. drop `OR 0` directly after an instruction that already set `F = A`.

use crate::inst::{Inst, InstKind, Op, Operand};
use std::collections::HashSet;

pub fn reduce(insts: Vec<Inst>) -> Vec<Inst> {
    let mut current = insts;
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn pass(insts: &[Inst]) -> Vec<Inst> {
    let referenced = referenced_tags(insts);
    let mut out: Vec<Inst> = Vec::with_capacity(insts.len());
    let mut i = 0;
    while i < insts.len() {
        let inst = &insts[i];

        // Rule 4: unreferenced tag.
        if let InstKind::Tag(name) = &inst.kind {
            if !referenced.contains(name.as_str()) {
                i += 1;
                continue;
            }
            out.push(inst.clone());
            i += 1;
            continue;
        }

        // Rule 1: store immediately reloaded.
        if let Some(next) = insts.get(i + 1)
            && store_then_reload(inst, next)
        {
            out.push(inst.clone());
            i += 2;
            continue;
        }

        // Rule 2: dead pure load.
        if is_pure_load(inst)
            && let Some(next) = insts.get(i + 1)
            && is_pure_load(next)
        {
            i += 1;
            continue;
        }

        // Rule 3: jump to the tag that follows it.
        if let InstKind::Op { op: Op::Jmp, args } = &inst.kind
            && let [Operand::Tag(target)] = args.as_slice()
            && insts.get(i + 1).and_then(|next| next.defined_tag()) == Some(target.as_str())
        {
            i += 1;
            continue;
        }

        // Rules 5 and 6: OR 0 placement.
        if is_or_zero(inst) {
            let prev_sets_flags = matches!(
                out.last().map(|p| &p.kind),
                Some(InstKind::Op { op, .. }) if op.sets_flags()
            );
            if prev_sets_flags || !branch_observes(insts, i + 1) {
                i += 1;
                continue;
            }
        }

        out.push(inst.clone());
        i += 1;
    }
    out
}

fn referenced_tags(insts: &[Inst]) -> HashSet<&str> {
    let mut referenced = HashSet::new();
    for inst in insts {
        if let InstKind::Op { args, .. } = &inst.kind {
            for arg in args {
                match arg {
                    Operand::Tag(name) | Operand::Raw(name) => {
                        referenced.insert(name.as_str());
                    }
                    _ => {}
                }
            }
        }
    }
    referenced
}

fn is_pure_load(inst: &Inst) -> bool {
    matches!(
        &inst.kind,
        InstKind::Op {
            op: Op::Lda | Op::Ldap,
            ..
        }
    )
}

fn is_or_zero(inst: &Inst) -> bool {
    matches!(
        &inst.kind,
        InstKind::Op { op: Op::Or, args } if matches!(args.as_slice(), [Operand::Imm(0)])
    )
}

fn store_then_reload(first: &Inst, second: &Inst) -> bool {
    match (&first.kind, &second.kind) {
        (
            InstKind::Op {
                op: Op::Sta,
                args: store_args,
            },
            InstKind::Op {
                op: Op::Lda,
                args: load_args,
            },
        )
        | (
            InstKind::Op {
                op: Op::Stap,
                args: store_args,
            },
            InstKind::Op {
                op: Op::Ldap,
                args: load_args,
            },
        ) => store_args == load_args,
        _ => false,
    }
}

/// Will a conditional branch observe the `F` set at this point, within
/// the current basic block? Stores preserve both `A` and `F` and are
/// skipped; flag-setting opcodes and block enders (tags, jumps, returns)
/// prove the value dead; anything else is kept conservatively — inline
/// asm may read flags in ways the reducer cannot see.
fn branch_observes(insts: &[Inst], mut i: usize) -> bool {
    while let Some(inst) = insts.get(i) {
        match &inst.kind {
            InstKind::Tag(_) => return false,
            InstKind::Op { op, .. } => match op {
                Op::Jz | Op::Jnz => return true,
                Op::Sta | Op::Stap => i += 1,
                Op::Jmp | Op::Ret | Op::Halt => return false,
                op if op.sets_flags() => return false,
                _ => return true,
            },
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op: Op, args: Vec<Operand>) -> Inst {
        Inst::op(op, args)
    }

    fn var(n: u32) -> Operand {
        Operand::Var(n)
    }

    fn imm(k: i32) -> Operand {
        Operand::Imm(k)
    }

    fn tag_ref(name: &str) -> Operand {
        Operand::Tag(name.to_string())
    }

    #[test]
    fn test_store_reload_collapsed() {
        let insts = vec![
            op(Op::Lda, vec![imm(3)]),
            op(Op::Sta, vec![var(5)]),
            op(Op::Lda, vec![var(5)]),
            op(Op::Sta, vec![var(6)]),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts);
        assert_eq!(
            reduced,
            vec![
                op(Op::Lda, vec![imm(3)]),
                op(Op::Sta, vec![var(5)]),
                op(Op::Sta, vec![var(6)]),
                op(Op::Halt, vec![]),
            ]
        );
    }

    #[test]
    fn test_store_reload_different_slots_kept() {
        let insts = vec![
            op(Op::Sta, vec![var(5)]),
            op(Op::Lda, vec![var(6)]),
            op(Op::Halt, vec![]),
        ];
        assert_eq!(reduce(insts.clone()), insts);
    }

    #[test]
    fn test_param_store_reload_collapsed() {
        let insts = vec![
            op(Op::Stap, vec![imm(2)]),
            op(Op::Ldap, vec![imm(2)]),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts);
        assert_eq!(
            reduced,
            vec![op(Op::Stap, vec![imm(2)]), op(Op::Halt, vec![])]
        );
    }

    #[test]
    fn test_dead_load_dropped() {
        let insts = vec![
            op(Op::Lda, vec![imm(1)]),
            op(Op::Lda, vec![imm(2)]),
            op(Op::Sta, vec![var(4)]),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts);
        assert_eq!(
            reduced,
            vec![
                op(Op::Lda, vec![imm(2)]),
                op(Op::Sta, vec![var(4)]),
                op(Op::Halt, vec![]),
            ]
        );
    }

    #[test]
    fn test_jump_to_following_tag_dropped_then_tag_collected() {
        let insts = vec![
            op(Op::Jmp, vec![tag_ref("L")]),
            Inst::tag("L"),
            op(Op::Halt, vec![]),
        ];
        // The jump goes first; the then-unreferenced tag goes on the next
        // pass of the fixed point.
        assert_eq!(reduce(insts), vec![op(Op::Halt, vec![])]);
    }

    #[test]
    fn test_referenced_tag_kept() {
        let insts = vec![
            Inst::tag("loop"),
            op(Op::Sub, vec![imm(1)]),
            op(Op::Jnz, vec![tag_ref("loop")]),
            op(Op::Halt, vec![]),
        ];
        assert_eq!(reduce(insts.clone()), insts);
    }

    #[test]
    fn test_raw_asm_operand_protects_tag() {
        let insts = vec![
            Inst::tag("L"),
            op(Op::Api("X".to_string()), vec![Operand::Raw("L".to_string())]),
            op(Op::Halt, vec![]),
        ];
        assert_eq!(reduce(insts.clone()), insts);
    }

    #[test]
    fn test_or_zero_kept_before_branch() {
        let insts = vec![
            op(Op::Lda, vec![var(4)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Jz, vec![tag_ref("L")]),
            Inst::tag("L"),
            op(Op::Halt, vec![]),
        ];
        assert_eq!(reduce(insts.clone()), insts);
    }

    #[test]
    fn test_or_zero_dropped_after_arithmetic() {
        let insts = vec![
            op(Op::Lda, vec![var(4)]),
            op(Op::Add, vec![imm(1)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Jz, vec![tag_ref("L")]),
            Inst::tag("L"),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts);
        assert!(!reduced.iter().any(is_or_zero));
        assert!(reduced.contains(&op(Op::Jz, vec![tag_ref("L")])));
    }

    #[test]
    fn test_or_zero_dropped_without_branch() {
        let insts = vec![
            op(Op::Lda, vec![var(4)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Sta, vec![var(5)]),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts);
        assert!(!reduced.iter().any(is_or_zero));
    }

    #[test]
    fn test_or_zero_kept_across_store_before_branch() {
        let insts = vec![
            op(Op::Lda, vec![var(4)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Sta, vec![var(5)]),
            op(Op::Jnz, vec![tag_ref("L")]),
            Inst::tag("L"),
            op(Op::Halt, vec![]),
        ];
        assert_eq!(reduce(insts.clone()), insts);
    }

    #[test]
    fn test_or_zero_kept_when_flags_use_is_opaque() {
        // A load between OR 0 and the branch: the reducer cannot prove
        // the flags dead, so the instruction stays. Only inline asm
        // produces this shape.
        let insts = vec![
            op(Op::Lda, vec![var(4)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Lda, vec![var(5)]),
            op(Op::Jz, vec![tag_ref("L")]),
            Inst::tag("L"),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts.clone());
        assert!(reduced.iter().any(is_or_zero));
    }

    #[test]
    fn test_reducer_is_idempotent() {
        let insts = vec![
            op(Op::Lda, vec![imm(3)]),
            op(Op::Add, vec![imm(5)]),
            op(Op::Sta, vec![var(4)]),
            op(Op::Lda, vec![var(4)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Jmp, vec![tag_ref("end")]),
            Inst::tag("dead"),
            Inst::tag("end"),
            op(Op::Halt, vec![]),
        ];
        let once = reduce(insts);
        let twice = reduce(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_conditional_branch_invariant_after_reduction() {
        // After reduction every JZ/JNZ is directly preceded by a
        // flag-setting opcode or an OR 0.
        let insts = vec![
            op(Op::Lda, vec![var(4)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Jz, vec![tag_ref("a")]),
            op(Op::Lda, vec![var(5)]),
            op(Op::Sub, vec![imm(1)]),
            op(Op::Or, vec![imm(0)]),
            op(Op::Jnz, vec![tag_ref("a")]),
            Inst::tag("a"),
            op(Op::Halt, vec![]),
        ];
        let reduced = reduce(insts);
        for (index, inst) in reduced.iter().enumerate() {
            if let InstKind::Op { op, .. } = &inst.kind
                && op.is_cond_jump()
            {
                let prev = &reduced[index - 1];
                let ok = is_or_zero(prev)
                    || matches!(&prev.kind, InstKind::Op { op, .. } if op.sets_flags());
                assert!(ok, "branch at {} lost its flag source", index);
            }
        }
    }
}
