//! VM API opcode table
//!
//! Maps the C-visible API function names (declared `extern` in the
//! embedded header) to their VM opcodes. External TOML manifests can
//! extend the table for daemons that expose additional opcodes:
//!
//! ```toml
//! [[function]]
//! c_name = "serialReadByte"
//! opcode = "SERR"
//! params = 1
//! returns = true
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;

/// One VM API function: opcode mnemonic, arity, and whether the opcode
/// leaves a result in `A` (false maps to a `void` C prototype).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFunction {
    pub opcode: String,
    pub arity: usize,
    pub returns_value: bool,
}

/// (name, opcode, arity, returns_value) for the standard daemon API.
/// Must stay in sync with the prototypes in include/pigs.h.
static STANDARD_API: LazyLock<HashMap<&'static str, ApiFunction>> = LazyLock::new(|| {
    let entry = |opcode: &str, arity: usize, returns_value: bool| ApiFunction {
        opcode: opcode.to_string(),
        arity,
        returns_value,
    };
    HashMap::from([
        ("gpioSetMode", entry("MODES", 2, true)),
        ("gpioGetMode", entry("MODEG", 1, true)),
        ("gpioSetPullUpDown", entry("PUD", 2, true)),
        ("gpioRead", entry("READ", 1, true)),
        ("gpioWrite", entry("WRITE", 2, true)),
        ("gpioPWM", entry("PWM", 2, true)),
        ("gpioServo", entry("SERVO", 2, true)),
        ("gpioTrigger", entry("TRIG", 3, true)),
        ("gpioSetWatchdog", entry("WDOG", 2, true)),
        ("gpioTick", entry("TICK", 0, true)),
        ("gpioHardwareRevision", entry("HWVER", 0, true)),
        ("timeSleepMillis", entry("MILS", 1, false)),
        ("timeSleepMicros", entry("MICS", 1, false)),
    ])
});

/// The resolved API table a compilation runs against: the standard
/// opcodes plus any manifest extensions.
#[derive(Debug, Clone)]
pub struct ApiTable {
    functions: HashMap<String, ApiFunction>,
}

impl Default for ApiTable {
    fn default() -> Self {
        ApiTable::standard()
    }
}

impl ApiTable {
    pub fn standard() -> Self {
        ApiTable {
            functions: STANDARD_API
                .iter()
                .map(|(name, function)| (name.to_string(), function.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ApiFunction> {
        self.functions.get(name)
    }

    /// Merge a manifest into the table. Redefining an existing entry is an
    /// error; the daemon would not know what to do with the opcode anyway.
    pub fn extend_from_manifest(&mut self, manifest: &ApiManifest) -> Result<(), String> {
        for function in &manifest.functions {
            if self.functions.contains_key(&function.c_name) {
                return Err(format!(
                    "API manifest redefines '{}'",
                    function.c_name
                ));
            }
            self.functions.insert(
                function.c_name.clone(),
                ApiFunction {
                    opcode: function.opcode.clone(),
                    arity: function.params,
                    returns_value: function.returns,
                },
            );
        }
        Ok(())
    }
}

fn default_returns() -> bool {
    true
}

/// A function binding in an API manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFunction {
    /// The name C code calls (e.g. "serialReadByte").
    pub c_name: String,
    /// The VM opcode it lowers to (e.g. "SERR").
    pub opcode: String,
    /// Number of arguments the opcode takes.
    #[serde(default)]
    pub params: usize,
    /// Whether the opcode leaves a result in the accumulator.
    #[serde(default = "default_returns")]
    pub returns: bool,
}

/// Top-level API manifest structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiManifest {
    #[serde(rename = "function", default)]
    pub functions: Vec<ManifestFunction>,
}

impl ApiManifest {
    /// Parse a manifest from TOML content and validate it.
    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: Self =
            toml::from_str(content).map_err(|e| format!("failed to parse API manifest: {}", e))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), String> {
        if self.functions.is_empty() {
            return Err("API manifest defines no functions".to_string());
        }
        for function in &self.functions {
            let name = &function.c_name;
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                || name.starts_with(|c: char| c.is_ascii_digit())
            {
                return Err(format!("'{}' is not a valid C function name", name));
            }
            if function.opcode.is_empty()
                || !function
                    .opcode
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(format!(
                    "opcode '{}' for '{}' must be uppercase alphanumeric",
                    function.opcode, name
                ));
            }
            if function.params > 4 {
                return Err(format!(
                    "'{}' declares {} parameters; API opcodes take at most 4",
                    name, function.params
                ));
            }
        }
        Ok(())
    }
}
