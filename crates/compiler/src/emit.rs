//! Assembly emission
//!
//! Serialises the instruction list to the VM's textual syntax: one
//! instruction per line, tags as `tag name` lines, comments starting with
//! `//`. With comments enabled each source-line boundary is preceded by
//! the source text that produced the following instructions.

use crate::ast::{SourceLocation, TranslationUnit};
use crate::inst::{Inst, InstKind};
use crate::slots::{Allocation, USABLE_SLOTS};
use std::fmt::Write as _;

/// Resource usage of a compiled program, reported on stderr after
/// compilation. Exceeding a capacity is a warning: the daemon enforces
/// the limits at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStats {
    pub variables_used: u32,
    pub tags_used: u32,
}

impl UsageStats {
    pub const VARIABLE_CAPACITY: u32 = USABLE_SLOTS;
    pub const TAG_CAPACITY: u32 = 50;

    pub fn summary(&self) -> String {
        format!(
            "variables used: {}/{}, tags used: {}/{}",
            self.variables_used,
            Self::VARIABLE_CAPACITY,
            self.tags_used,
            Self::TAG_CAPACITY
        )
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.variables_used > Self::VARIABLE_CAPACITY {
            warnings.push(format!(
                "program needs {} variables but the VM provides {}; the daemon will reject the upload",
                self.variables_used,
                Self::VARIABLE_CAPACITY
            ));
        }
        if self.tags_used > Self::TAG_CAPACITY {
            warnings.push(format!(
                "program defines {} tags but the VM allows {}; the daemon will reject the upload",
                self.tags_used,
                Self::TAG_CAPACITY
            ));
        }
        warnings
    }
}

pub fn collect_stats(insts: &[Inst], alloc: &Allocation) -> UsageStats {
    let tags_used = insts
        .iter()
        .filter(|inst| matches!(inst.kind, InstKind::Tag(_)))
        .count() as u32;
    UsageStats {
        variables_used: alloc.used,
        tags_used,
    }
}

pub fn emit(insts: &[Inst], unit: &TranslationUnit, comments: bool) -> String {
    let mut text = String::new();
    let mut last: Option<SourceLocation> = None;
    for inst in insts {
        if comments
            && let Some(loc) = inst.loc
            && last != Some(loc)
        {
            last = Some(loc);
            let source = unit.line_text(loc).trim();
            if !source.is_empty() {
                let _ = writeln!(text, "// {}", source);
            }
        }
        match &inst.kind {
            InstKind::Tag(name) => {
                let _ = writeln!(text, "tag {}", name);
            }
            InstKind::Op { op, args } => {
                let _ = write!(text, "{}", op.mnemonic());
                for arg in args {
                    let _ = write!(text, " {}", arg);
                }
                text.push('\n');
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{SourceFile, TranslationUnit};
    use crate::inst::{Inst, Op, Operand};
    use std::path::PathBuf;

    fn unit_with_lines(lines: &[&str]) -> TranslationUnit {
        TranslationUnit {
            files: vec![SourceFile {
                path: PathBuf::from("test.c"),
                lines: lines.iter().map(|l| l.to_string()).collect(),
            }],
            decls: Vec::new(),
        }
    }

    #[test]
    fn test_emit_plain() {
        let unit = unit_with_lines(&[]);
        let insts = vec![
            Inst::op(Op::Lda, vec![Operand::Imm(3)]),
            Inst::op(Op::Add, vec![Operand::Imm(5)]),
            Inst::op(Op::Stap, vec![Operand::Imm(0)]),
            Inst::tag("done"),
            Inst::op(Op::Halt, vec![]),
        ];
        let text = emit(&insts, &unit, false);
        assert_eq!(text, "LDA 3\nADD 5\nSTAP 0\ntag done\nHALT\n");
    }

    #[test]
    fn test_emit_with_source_comments() {
        let unit = unit_with_lines(&["p0 = 3 + 5;"]);
        let loc = SourceLocation { file: 0, line: 0 };
        let insts = vec![
            Inst::op(Op::Lda, vec![Operand::Imm(3)]).with_loc(Some(loc)),
            Inst::op(Op::Add, vec![Operand::Imm(5)]).with_loc(Some(loc)),
            Inst::op(Op::Halt, vec![]),
        ];
        let text = emit(&insts, &unit, true);
        assert_eq!(text, "// p0 = 3 + 5;\nLDA 3\nADD 5\nHALT\n");
    }

    #[test]
    fn test_comment_emitted_once_per_line_boundary() {
        let unit = unit_with_lines(&["a = 1;", "b = 2;"]);
        let first = SourceLocation { file: 0, line: 0 };
        let second = SourceLocation { file: 0, line: 1 };
        let insts = vec![
            Inst::op(Op::Lda, vec![Operand::Imm(1)]).with_loc(Some(first)),
            Inst::op(Op::Sta, vec![Operand::Var(4)]).with_loc(Some(first)),
            Inst::op(Op::Lda, vec![Operand::Imm(2)]).with_loc(Some(second)),
            Inst::op(Op::Sta, vec![Operand::Var(5)]).with_loc(Some(second)),
        ];
        let text = emit(&insts, &unit, true);
        assert_eq!(text.matches("// a = 1;").count(), 1);
        assert_eq!(text.matches("// b = 2;").count(), 1);
    }

    #[test]
    fn test_summary_format() {
        let stats = UsageStats {
            variables_used: 12,
            tags_used: 3,
        };
        assert_eq!(stats.summary(), "variables used: 12/146, tags used: 3/50");
        assert!(stats.warnings().is_empty());
    }

    #[test]
    fn test_overflow_is_a_warning() {
        let stats = UsageStats {
            variables_used: 150,
            tags_used: 51,
        };
        let warnings = stats.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("150"));
        assert!(warnings[1].contains("51"));
    }
}
