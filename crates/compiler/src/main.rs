//! pigcc CLI
//!
//! Compiles C sources to PIGS VM assembly. Diagnostics and the resource
//! usage summary go to stderr; the assembly goes to a `.s` file next to
//! the current directory (or stdout with `-o-`).

use clap::{CommandFactory, Parser};
use clap_complete::{Shell, generate};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "pigcc")]
#[command(about = "Compile a C99 subset to PIGS VM assembly", long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// C source files
    #[arg(value_name = "SOURCE")]
    sources: Vec<PathBuf>,

    /// Output path ('-' writes to stdout; default: last input's basename with .s)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Interleave source comments in the assembly
    #[arg(short = 'c', long)]
    comments: bool,

    /// Disable the peephole reducer
    #[arg(short = 'n', long = "no-reduce")]
    no_reduce: bool,

    /// Show internal detail for compiler diagnostics
    #[arg(short = 'd', long)]
    debug: bool,

    /// Print the version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Additional VM API manifest file(s) to load
    #[arg(long = "api-manifest", value_name = "PATH")]
    api_manifests: Vec<PathBuf>,

    /// Generate a shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "pigcc", &mut io::stdout());
        return;
    }
    if cli.version {
        println!("pigcc {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if cli.sources.is_empty() {
        eprintln!("error: no input files");
        process::exit(1);
    }

    let config = pigcc::CompilerConfig {
        comments: cli.comments,
        reduce: !cli.no_reduce,
        debug: cli.debug,
        api_manifest_paths: cli.api_manifests,
    };

    let output = match pigcc::compile_files(&cli.sources, &config) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    for warning in &output.warnings {
        eprintln!("warning: {}", warning);
    }
    eprintln!("{}", output.stats.summary());

    let dest = cli
        .output
        .unwrap_or_else(|| default_output(&cli.sources[cli.sources.len() - 1]));
    if dest == Path::new("-") {
        print!("{}", output.assembly);
        return;
    }
    if let Err(e) = std::fs::write(&dest, &output.assembly) {
        eprintln!("error: failed to write '{}': {}", dest.display(), e);
        process::exit(1);
    }
}

/// Default output: the last input's basename with a `.s` extension, in
/// the current directory.
fn default_output(last_input: &Path) -> PathBuf {
    let stem = last_input.file_stem().unwrap_or_default();
    PathBuf::from(stem).with_extension("s")
}
