//! Embedded VM API header
//!
//! The header is compiled into the binary so pigcc is fully
//! self-contained: no include paths, no install step.

/// Name the header appears under in diagnostics.
pub const API_HEADER_NAME: &str = "<pigs.h>";

/// The embedded header source.
pub fn api_header() -> &'static str {
    include_str!("../include/pigs.h")
}

/// Does this input path look like a user-supplied replacement header?
pub fn is_user_header(path: &std::path::Path) -> bool {
    path.file_name().is_some_and(|name| name == "pigs.h")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_header_declares_core_api() {
        let header = api_header();
        for name in ["gpioWrite", "gpioRead", "gpioSetMode", "PI_INIT_FAILED", "p0", "p9"] {
            assert!(header.contains(name), "header is missing {}", name);
        }
    }

    #[test]
    fn test_user_header_detection() {
        assert!(is_user_header(Path::new("overrides/pigs.h")));
        assert!(!is_user_header(Path::new("blink.c")));
    }
}
