//! Diagnostic and property tests over whole compilations

use pigcc::{CompilerConfig, ErrorKind, compile_to_asm};
use pigs_vm::{Program, VmError};

fn compile_err(source: &str) -> pigcc::CompileError {
    compile_to_asm(source, &CompilerConfig::default()).expect_err("expected a compile error")
}

#[test]
fn test_direct_recursion_is_an_error() {
    let err = compile_err("int fact(int n) { return n * fact(n - 1); } int main() { return fact(5); }");
    assert_eq!(err.kind, ErrorKind::Recursion);
    assert!(err.message.contains("fact"));
}

#[test]
fn test_mutual_recursion_is_an_error() {
    let err = compile_err(
        "int pong(int n);\n\
         int ping(int n) { return pong(n - 1); }\n\
         int pong(int n) { return ping(n - 1); }\n\
         int main() { return ping(4); }",
    );
    assert_eq!(err.kind, ErrorKind::Recursion);
}

#[test]
fn test_annotated_recursion_compiles() {
    let out = compile_to_asm(
        "int depth(int n) {\n\
           asm(\"push\");\n\
           if (n > 0) { depth(n - 1); }\n\
           asm(\"pop\");\n\
           return n;\n\
         }\n\
         int main() { p0 = depth(3); return 0; }",
        &CompilerConfig::default(),
    )
    .unwrap();
    Program::load(&out.assembly).unwrap();
}

#[test]
fn test_scratch_exhaustion() {
    let err =
        compile_err("int main() { p0 = (((1 + (2+3)) + (4+5)) + (6+7)) + (8+9); return 0; }");
    assert_eq!(err.kind, ErrorKind::ScratchExhaustion);
}

#[test]
fn test_three_deep_nesting_still_fits() {
    compile_to_asm(
        "int main() { p0 = ((1 + (2+3)) + (4+5)) + (6+7); return 0; }",
        &CompilerConfig::default(),
    )
    .unwrap();
}

#[test]
fn test_duplicate_inline_asm_tag() {
    let err = compile_err("int main() { asm(\"Tag\", \"X\"); asm(\"Tag\", \"X\"); return 0; }");
    assert_eq!(err.kind, ErrorKind::TagCollision);
    assert!(err.message.contains("X"));
}

#[test]
fn test_asm_tag_colliding_with_function_tag() {
    let err = compile_err(
        "void helper() { }\n\
         int main() { asm(\"Tag\", \"helper\"); helper(); return 0; }",
    );
    assert_eq!(err.kind, ErrorKind::TagCollision);
}

#[test]
fn test_malformed_asm_tag_operand() {
    let err = compile_err("int main() { asm(\"Tag\", 5); return 0; }");
    assert_eq!(err.kind, ErrorKind::Asm);
}

#[test]
fn test_unsupported_construct_reports_location() {
    let err = compile_err("int main() {\n  int *p;\n  return 0;\n}");
    assert_eq!(err.kind, ErrorKind::SyntaxUnsupported);
    assert_eq!(err.location.as_deref(), Some("input.c:2"));
}

#[test]
fn test_undefined_called_function() {
    let err = compile_err("int helper(int x); int main() { return helper(1); }");
    assert_eq!(err.kind, ErrorKind::Scope);
    assert!(err.message.contains("never defined"));
}

#[test]
fn test_slot_overflow_warns_but_compiles() {
    let mut source = String::new();
    for i in 0..150 {
        source.push_str(&format!("int g{} = {};\n", i, i));
    }
    source.push_str("int main() { p0 = g0; return 0; }\n");

    let out = compile_to_asm(&source, &CompilerConfig::default()).unwrap();
    assert!(out.stats.variables_used > 146);
    assert!(!out.warnings.is_empty());
    assert!(out.warnings[0].contains("150"));

    // The daemon-side check rejects what the compiler only warned about.
    let err = Program::load(&out.assembly).unwrap_err();
    assert!(matches!(err, VmError::Load(_)));
}

#[test]
fn test_tag_overflow_warns_but_compiles() {
    // Each if/else costs two tags; 30 of them blow the 50-tag budget.
    let mut source = String::from("int main() { int a = 0;\n");
    for i in 0..30 {
        source.push_str(&format!(
            "if (p0 == {}) {{ a = a + {}; }} else {{ a = a - 1; }}\n",
            i, i
        ));
    }
    source.push_str("p1 = a; return 0; }\n");

    let out = compile_to_asm(&source, &CompilerConfig::default()).unwrap();
    assert!(out.stats.tags_used > 50);
    assert!(out.warnings.iter().any(|w| w.contains("tags")));
}

/// §8 invariant: after reduction, every conditional branch directly
/// follows an opcode that refreshed `F = A` (or an explicit `OR 0`).
#[test]
fn test_branch_flag_invariant_over_reduced_output() {
    let out = compile_to_asm(
        "int classify(int x) { if (x < 0) { return -1; } if (x == 0) { return 0; } return 1; }\n\
         int main() {\n\
           int i;\n\
           for (i = -2; i <= 2; ++i) { p0 += classify(i) + 1; }\n\
           while (p1 < 3) { ++p1; }\n\
           do { ++p2; } while (p2 < 2);\n\
           p3 = p0 && p1 || !p2;\n\
           return 0;\n\
         }",
        &CompilerConfig::default(),
    )
    .unwrap();

    const FLAG_SETTERS: &[&str] = &[
        "ADD", "SUB", "MUL", "DIV", "MOD", "AND", "OR", "XOR", "SHL", "SHR", "NEG",
    ];
    let lines: Vec<&str> = out.assembly.lines().filter(|l| !l.starts_with("//")).collect();
    for (index, line) in lines.iter().enumerate() {
        if line.starts_with("JZ") || line.starts_with("JNZ") {
            assert!(index > 0, "branch at the very start of the program");
            let prev = lines[index - 1];
            let mnemonic = prev.split_whitespace().next().unwrap_or("");
            assert!(
                FLAG_SETTERS.contains(&mnemonic),
                "branch '{}' follows '{}', which does not set F",
                line,
                prev
            );
        }
    }
}

/// §8 invariant: the emitted program parses back with every referenced
/// tag defined exactly once.
#[test]
fn test_emitted_programs_are_well_formed() {
    let sources = [
        "int main() { p0 = 1 + 2; return 0; }",
        "int f(int x) { return x * 2; } int main() { p0 = f(21); return 0; }",
        "int main() { int i; for (i = 0; i < 3; ++i) { p0 += i; } return 0; }",
        "int main() { p0 = p1 && p2 || !p3; return 0; }",
    ];
    for source in sources {
        let reduced = compile_to_asm(source, &CompilerConfig::default()).unwrap();
        Program::load(&reduced.assembly).unwrap();
        let unreduced =
            compile_to_asm(source, &CompilerConfig::new().with_reducer(false)).unwrap();
        Program::load(&unreduced.assembly).unwrap();
    }
}
