//! Compiler configuration
//!
//! Options threaded through the pipeline by the CLI or by embedding
//! projects (the test suite uses them to compare reduced and unreduced
//! output of the same program).

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Interleave `// <source>` comments at source-line boundaries.
    pub comments: bool,
    /// Run the peephole reducer (disabled by `-n`).
    pub reduce: bool,
    /// Include internal detail when rendering diagnostics (`-d`).
    pub debug: bool,
    /// Extra VM API manifests to merge into the opcode table.
    pub api_manifest_paths: Vec<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            comments: false,
            reduce: true,
            debug: false,
            api_manifest_paths: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_reducer(mut self, reduce: bool) -> Self {
        self.reduce = reduce;
        self
    }

    pub fn with_api_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.api_manifest_paths.push(path.into());
        self
    }

    pub fn with_api_manifests(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.api_manifest_paths.extend(paths);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(config.reduce);
        assert!(!config.comments);
        assert!(!config.debug);
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::new()
            .with_comments(true)
            .with_reducer(false)
            .with_api_manifest("extra.toml");
        assert!(config.comments);
        assert!(!config.reduce);
        assert_eq!(config.api_manifest_paths.len(), 1);
    }
}
