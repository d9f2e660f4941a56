//! pigcc — C compiler for the PIGS scripting VM
//!
//! Translates a restricted C99 subset (32-bit ints, functions, enums,
//! structured control flow, inline `asm()`) into the accumulator-based
//! assembly of the PIGS VM hosted by the pigpiod daemon.
//!
//! # Pipeline
//!
//! One translation unit is formed from the embedded API header plus every
//! input file, then flows through strictly sequential passes:
//!
//! 1. [`parser`] — tokens → AST
//! 2. [`resolver`] — scopes, declaration classification, the int type wall
//! 3. [`call_graph`] — recursion ban (Tarjan SCC) and frame layering order
//! 4. [`slots`] — VM slot assignment (`v4..v149`; `v0..v3` reserved)
//! 5. [`codegen`] — AST → instruction list under the `F == A` discipline
//! 6. [`reduce`] — peephole rewrites to a fixed point
//! 7. [`emit`] — textual assembly plus the resource usage summary
//!
//! # Embedding
//!
//! ```rust
//! use pigcc::{CompilerConfig, compile_to_asm};
//!
//! let out = compile_to_asm("int main() { p0 = 3 + 5; return 0; }",
//!                          &CompilerConfig::default()).unwrap();
//! assert!(out.assembly.contains("STAP 0"));
//! ```

pub mod ast;
pub mod builtins;
pub mod call_graph;
pub mod codegen;
pub mod config;
pub mod consteval;
pub mod emit;
pub mod error;
pub mod header;
pub mod inst;
pub mod parser;
pub mod reduce;
pub mod resolver;
pub mod slots;

pub use builtins::{ApiFunction, ApiManifest, ApiTable};
pub use codegen::CodeGen;
pub use config::CompilerConfig;
pub use emit::UsageStats;
pub use error::{CompileError, ErrorKind};

use ast::TranslationUnit;
use call_graph::CallGraph;
use std::fs;
use std::path::PathBuf;

/// A successful compilation: the assembly text, resource usage, and any
/// resource warnings (the caller decides where they go; the CLI prints
/// them to stderr).
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub assembly: String,
    pub stats: UsageStats,
    pub warnings: Vec<String>,
}

/// Compile already-loaded sources against a resolved API table.
///
/// The embedded API header is logically prepended unless one of the
/// inputs is itself named `pigs.h`.
pub fn compile_sources(
    sources: Vec<(PathBuf, String)>,
    config: &CompilerConfig,
    api: &ApiTable,
) -> Result<CompileOutput, CompileError> {
    let mut unit = TranslationUnit::new();
    let mut next_id = 0;

    let supply_header = !sources.iter().any(|(path, _)| header::is_user_header(path));
    if supply_header {
        let (file, decls) = parser::parse_source(
            header::api_header(),
            PathBuf::from(header::API_HEADER_NAME),
            0,
            &mut next_id,
        )?;
        unit.files.push(file);
        unit.decls.extend(decls);
    }
    for (path, text) in sources {
        let index = unit.files.len();
        let (file, decls) = parser::parse_source(&text, path, index, &mut next_id)?;
        unit.files.push(file);
        unit.decls.extend(decls);
    }

    let resolved = resolver::resolve(&unit, api)?;
    let graph = CallGraph::build(&unit, &resolved)?;
    graph.check_recursion(&unit, &resolved)?;
    let alloc = slots::allocate(&unit, &resolved, &graph)?;

    let insts = CodeGen::new(&unit, &resolved, &alloc).generate()?;
    let insts = if config.reduce {
        reduce::reduce(insts)
    } else {
        insts
    };

    let stats = emit::collect_stats(&insts, &alloc);
    let warnings = stats.warnings();
    let assembly = emit::emit(&insts, &unit, config.comments);
    Ok(CompileOutput {
        assembly,
        stats,
        warnings,
    })
}

/// Compile one in-memory source with the standard API table. The main
/// entry point for tests and embedders.
pub fn compile_to_asm(source: &str, config: &CompilerConfig) -> Result<CompileOutput, CompileError> {
    compile_sources(
        vec![(PathBuf::from("input.c"), source.to_string())],
        config,
        &ApiTable::standard(),
    )
}

/// Compile source files from disk, loading any API manifests named in the
/// config. Errors are rendered to strings here (with internal detail when
/// `config.debug` is set) so the CLI can print and exit.
pub fn compile_files(
    inputs: &[PathBuf],
    config: &CompilerConfig,
) -> Result<CompileOutput, String> {
    if inputs.is_empty() {
        return Err("no input files".to_string());
    }

    let mut api = ApiTable::standard();
    for path in &config.api_manifest_paths {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read API manifest '{}': {}", path.display(), e))?;
        let manifest =
            ApiManifest::parse(&content).map_err(|e| format!("{}: {}", path.display(), e))?;
        api.extend_from_manifest(&manifest)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
    }

    let mut sources = Vec::with_capacity(inputs.len());
    for path in inputs {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
        sources.push((path.clone(), text));
    }

    compile_sources(sources, config, &api).map_err(|e| render_error(&e, config.debug))
}

fn render_error(error: &CompileError, debug: bool) -> String {
    if debug {
        format!("{}\n  detail: {:?}", error, error)
    } else {
        error.to_string()
    }
}
