//! Reference interpreter for the PIGS scripting VM
//!
//! Executes the textual assembly produced by the compiler so that compiled
//! programs can be checked end-to-end: load a program, run it to `HALT`,
//! inspect the parameter registers.
//!
//! # Machine model
//!
//! A single accumulator `A`, a flags register `F`, 150 indexed variables
//! `v0..v149`, 10 parameters `p0..p9`, named tags as jump/call targets and
//! one shared stack used by `CALL`/`RET` and `PUSH`/`POP`.
//!
//! The flags register is only refreshed by arithmetic and logical opcodes
//! (`F` receives the result). Plain loads and stores leave `F` untouched,
//! which is exactly the gap the compiler papers over with `OR 0` before
//! conditional branches.
//!
//! API opcodes (e.g. `WRITE`, `READ`) are dispatched through the [`Host`]
//! trait; the returned value lands in `A`.

use std::collections::HashMap;
use std::fmt;

/// Number of indexed variables.
pub const NUM_VARS: usize = 150;
/// Number of externally visible parameters.
pub const NUM_PARAMS: usize = 10;
/// Maximum number of tags a program may define.
pub const MAX_TAGS: usize = 50;

/// Errors raised while loading or executing a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The program text was rejected at load time (syntax or resource limits).
    Load(String),
    DivideByZero { pc: usize },
    StackUnderflow { pc: usize },
    BadParamIndex { pc: usize, index: i32 },
    /// The host rejected or did not recognise an API opcode.
    Api { pc: usize, message: String },
    /// The step limit was exceeded; the program is probably looping.
    StepLimit(usize),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Load(msg) => write!(f, "load error: {}", msg),
            VmError::DivideByZero { pc } => write!(f, "division by zero at instruction {}", pc),
            VmError::StackUnderflow { pc } => write!(f, "stack underflow at instruction {}", pc),
            VmError::BadParamIndex { pc, index } => {
                write!(f, "parameter index {} out of range at instruction {}", index, pc)
            }
            VmError::Api { pc, message } => {
                write!(f, "API error at instruction {}: {}", pc, message)
            }
            VmError::StepLimit(limit) => {
                write!(f, "step limit of {} exceeded (infinite loop?)", limit)
            }
        }
    }
}

impl std::error::Error for VmError {}

/// Handler for API opcodes the VM itself does not implement.
pub trait Host {
    /// Execute API opcode `op` with already-evaluated arguments.
    /// The returned value is stored into the accumulator.
    fn api(&mut self, op: &str, args: &[i32]) -> Result<i32, String>;
}

/// Host that rejects every API opcode. Suitable for pure-computation programs.
pub struct NoHost;

impl Host for NoHost {
    fn api(&mut self, op: &str, _args: &[i32]) -> Result<i32, String> {
        Err(format!("API opcode '{}' not available", op))
    }
}

/// In-memory GPIO model for tests: pins, modes, pull-ups and a tick counter.
///
/// Every API call is also appended to `calls` so tests can assert on the
/// exact sequence a compiled program issued.
#[derive(Default)]
pub struct MemoryHost {
    pins: HashMap<i32, i32>,
    modes: HashMap<i32, i32>,
    puds: HashMap<i32, i32>,
    tick: i32,
    pub calls: Vec<(String, Vec<i32>)>,
}

impl MemoryHost {
    pub fn new() -> Self {
        MemoryHost::default()
    }

    /// Current level of a pin (0 when never written).
    pub fn pin(&self, gpio: i32) -> i32 {
        self.pins.get(&gpio).copied().unwrap_or(0)
    }

    /// Preset a pin level before running a program.
    pub fn set_pin(&mut self, gpio: i32, level: i32) {
        self.pins.insert(gpio, level);
    }

    pub fn mode(&self, gpio: i32) -> i32 {
        self.modes.get(&gpio).copied().unwrap_or(0)
    }
}

fn arg(args: &[i32], index: usize) -> i32 {
    args.get(index).copied().unwrap_or(0)
}

impl Host for MemoryHost {
    fn api(&mut self, op: &str, args: &[i32]) -> Result<i32, String> {
        self.calls.push((op.to_string(), args.to_vec()));
        match op {
            "MODES" => {
                self.modes.insert(arg(args, 0), arg(args, 1));
                Ok(0)
            }
            "MODEG" => Ok(self.mode(arg(args, 0))),
            "PUD" => {
                self.puds.insert(arg(args, 0), arg(args, 1));
                Ok(0)
            }
            "READ" => Ok(self.pin(arg(args, 0))),
            "WRITE" => {
                self.pins.insert(arg(args, 0), arg(args, 1));
                Ok(0)
            }
            "PWM" | "SERVO" | "TRIG" | "WDOG" => Ok(0),
            "TICK" => {
                self.tick = self.tick.wrapping_add(1);
                Ok(self.tick)
            }
            "HWVER" => Ok(17),
            "MILS" | "MICS" => Ok(0),
            other => Err(format!("unknown API opcode '{}'", other)),
        }
    }
}

/// An operand as it appears in the assembly text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Imm(i32),
    Var(usize),
    Param(usize),
    /// Tag reference, resolved to an instruction index at load time.
    Target(usize),
}

#[derive(Debug, Clone)]
struct Inst {
    op: String,
    args: Vec<Operand>,
}

/// A loaded, tag-resolved program ready for execution.
#[derive(Debug)]
pub struct Program {
    insts: Vec<Inst>,
}

impl Program {
    /// Parse assembly text and resolve tags.
    ///
    /// Mirrors the daemon's upload checks: variable indexes beyond `v149`,
    /// parameter indexes beyond `p9`, more than 50 tags, duplicate tags and
    /// references to undefined tags are all rejected.
    pub fn load(text: &str) -> Result<Program, VmError> {
        // Pass 1: split into raw instructions, remember tag positions.
        let mut raw: Vec<(String, Vec<String>, usize)> = Vec::new();
        let mut tags: HashMap<String, usize> = HashMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = match line.find("//") {
                Some(idx) => &line[..idx],
                None => line,
            };
            let mut words = line.split_whitespace();
            let first = match words.next() {
                Some(w) => w,
                None => continue,
            };
            if first == "tag" {
                let name = words.next().ok_or_else(|| {
                    VmError::Load(format!("line {}: tag without a name", lineno + 1))
                })?;
                if words.next().is_some() {
                    return Err(VmError::Load(format!(
                        "line {}: trailing text after tag name",
                        lineno + 1
                    )));
                }
                if tags.insert(name.to_string(), raw.len()).is_some() {
                    return Err(VmError::Load(format!(
                        "line {}: duplicate tag '{}'",
                        lineno + 1,
                        name
                    )));
                }
                continue;
            }
            let args: Vec<String> = words.map(str::to_string).collect();
            raw.push((first.to_string(), args, lineno + 1));
        }

        if tags.len() > MAX_TAGS {
            return Err(VmError::Load(format!(
                "program defines {} tags, limit is {}",
                tags.len(),
                MAX_TAGS
            )));
        }

        // Pass 2: parse operands, resolving tag references.
        let mut insts = Vec::with_capacity(raw.len());
        for (op, words, lineno) in raw {
            let mut args = Vec::with_capacity(words.len());
            for word in &words {
                args.push(parse_operand(word, &tags, lineno)?);
            }
            insts.push(Inst { op, args });
        }
        Ok(Program { insts })
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

fn parse_operand(
    word: &str,
    tags: &HashMap<String, usize>,
    lineno: usize,
) -> Result<Operand, VmError> {
    if let Some(rest) = word.strip_prefix('v')
        && rest.chars().all(|c| c.is_ascii_digit())
        && !rest.is_empty()
    {
        let index: usize = rest
            .parse()
            .map_err(|_| VmError::Load(format!("line {}: bad variable '{}'", lineno, word)))?;
        if index >= NUM_VARS {
            return Err(VmError::Load(format!(
                "line {}: variable {} out of range (v0..v{})",
                lineno,
                word,
                NUM_VARS - 1
            )));
        }
        return Ok(Operand::Var(index));
    }
    if let Some(rest) = word.strip_prefix('p')
        && rest.chars().all(|c| c.is_ascii_digit())
        && !rest.is_empty()
    {
        let index: usize = rest
            .parse()
            .map_err(|_| VmError::Load(format!("line {}: bad parameter '{}'", lineno, word)))?;
        if index >= NUM_PARAMS {
            return Err(VmError::Load(format!(
                "line {}: parameter {} out of range (p0..p{})",
                lineno,
                word,
                NUM_PARAMS - 1
            )));
        }
        return Ok(Operand::Param(index));
    }
    if let Ok(value) = word.parse::<i32>() {
        return Ok(Operand::Imm(value));
    }
    match tags.get(word) {
        Some(&target) => Ok(Operand::Target(target)),
        None => Err(VmError::Load(format!(
            "line {}: undefined tag '{}'",
            lineno, word
        ))),
    }
}

/// The virtual machine state.
#[derive(Debug)]
pub struct Vm {
    pub a: i32,
    pub f: i32,
    pub v: [i32; NUM_VARS],
    pub p: [i32; NUM_PARAMS],
    stack: Vec<i32>,
    pub steps: usize,
    pub step_limit: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            a: 0,
            f: 0,
            v: [0; NUM_VARS],
            p: [0; NUM_PARAMS],
            stack: Vec::new(),
            steps: 0,
            step_limit: 1_000_000,
        }
    }

    fn value(&self, operand: &Operand, pc: usize) -> Result<i32, VmError> {
        match operand {
            Operand::Imm(k) => Ok(*k),
            Operand::Var(i) => Ok(self.v[*i]),
            Operand::Param(i) => Ok(self.p[*i]),
            Operand::Target(_) => Err(VmError::Load(format!(
                "instruction {}: tag operand in a non-jump position",
                pc
            ))),
        }
    }

    fn operand<'a>(inst: &'a Inst, index: usize, pc: usize) -> Result<&'a Operand, VmError> {
        inst.args.get(index).ok_or_else(|| {
            VmError::Load(format!("instruction {}: {} missing operand", pc, inst.op))
        })
    }

    fn param_index(&self, inst: &Inst, pc: usize) -> Result<usize, VmError> {
        let index = self.value(Self::operand(inst, 0, pc)?, pc)?;
        if !(0..NUM_PARAMS as i32).contains(&index) {
            return Err(VmError::BadParamIndex { pc, index });
        }
        Ok(index as usize)
    }

    fn target(inst: &Inst, pc: usize) -> Result<usize, VmError> {
        match Self::operand(inst, 0, pc)? {
            Operand::Target(t) => Ok(*t),
            other => Err(VmError::Load(format!(
                "instruction {}: {} needs a tag operand, got {:?}",
                pc, inst.op, other
            ))),
        }
    }

    /// Run the program from instruction 0 until `HALT`, falling off the end,
    /// or an error. The machine state is left in place for inspection.
    pub fn run(&mut self, program: &Program, host: &mut dyn Host) -> Result<(), VmError> {
        let mut pc = 0usize;
        while pc < program.insts.len() {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(VmError::StepLimit(self.step_limit));
            }
            let inst = &program.insts[pc];
            let mut next = pc + 1;
            match inst.op.as_str() {
                "LDA" => self.a = self.value(Self::operand(inst, 0, pc)?, pc)?,
                "STA" => match Self::operand(inst, 0, pc)? {
                    Operand::Var(i) => self.v[*i] = self.a,
                    other => {
                        return Err(VmError::Load(format!(
                            "instruction {}: STA needs a variable, got {:?}",
                            pc, other
                        )));
                    }
                },
                "LDAP" => {
                    let index = self.param_index(inst, pc)?;
                    self.a = self.p[index];
                }
                "STAP" => {
                    let index = self.param_index(inst, pc)?;
                    self.p[index] = self.a;
                }
                "ADD" | "SUB" | "MUL" | "DIV" | "MOD" | "AND" | "OR" | "XOR" | "SHL" | "SHR" => {
                    let rhs = self.value(Self::operand(inst, 0, pc)?, pc)?;
                    self.a = apply_arith(&inst.op, self.a, rhs, pc)?;
                    self.f = self.a;
                }
                "NEG" => {
                    self.a = self.a.wrapping_neg();
                    self.f = self.a;
                }
                "CMP" => {
                    let rhs = self.value(Self::operand(inst, 0, pc)?, pc)?;
                    self.f = self.a.wrapping_sub(rhs);
                }
                "JMP" => next = Self::target(inst, pc)?,
                "JZ" => {
                    if self.f == 0 {
                        next = Self::target(inst, pc)?;
                    }
                }
                "JNZ" => {
                    if self.f != 0 {
                        next = Self::target(inst, pc)?;
                    }
                }
                "CALL" => {
                    self.stack.push((pc + 1) as i32);
                    next = Self::target(inst, pc)?;
                }
                "RET" => {
                    let addr = self.stack.pop().ok_or(VmError::StackUnderflow { pc })?;
                    next = addr as usize;
                }
                "PUSH" | "PUSHA" => self.stack.push(self.a),
                "POP" | "POPA" => {
                    self.a = self.stack.pop().ok_or(VmError::StackUnderflow { pc })?;
                }
                "HALT" => return Ok(()),
                api => {
                    let mut args = Vec::with_capacity(inst.args.len());
                    for operand in &inst.args {
                        args.push(self.value(operand, pc)?);
                    }
                    self.a = host
                        .api(api, &args)
                        .map_err(|message| VmError::Api { pc, message })?;
                }
            }
            pc = next;
        }
        Ok(())
    }
}

fn apply_arith(op: &str, a: i32, b: i32, pc: usize) -> Result<i32, VmError> {
    Ok(match op {
        "ADD" => a.wrapping_add(b),
        "SUB" => a.wrapping_sub(b),
        "MUL" => a.wrapping_mul(b),
        "DIV" => {
            if b == 0 {
                return Err(VmError::DivideByZero { pc });
            }
            a.wrapping_div(b)
        }
        "MOD" => {
            if b == 0 {
                return Err(VmError::DivideByZero { pc });
            }
            a.wrapping_rem(b)
        }
        "AND" => a & b,
        "OR" => a | b,
        "XOR" => a ^ b,
        // Shift counts are masked to 5 bits; SHR is arithmetic.
        "SHL" => a.wrapping_shl(b as u32 & 31),
        "SHR" => a >> (b as u32 & 31),
        _ => unreachable!("apply_arith called with {}", op),
    })
}

/// Convenience: load, run with [`NoHost`], return the final machine.
pub fn run_program(text: &str) -> Result<Vm, VmError> {
    let program = Program::load(text)?;
    let mut vm = Vm::new();
    vm.run(&program, &mut NoHost)?;
    Ok(vm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_and_store() {
        let vm = run_program("LDA 3\nADD 5\nSTAP 0\nHALT\n").unwrap();
        assert_eq!(vm.p[0], 8);
        assert_eq!(vm.f, 8);
    }

    #[test]
    fn test_lda_does_not_touch_flags() {
        // F stays at the SUB result even though A is reloaded.
        let vm = run_program("LDA 5\nSUB 5\nLDA 9\nSTA v10\nHALT\n").unwrap();
        assert_eq!(vm.a, 9);
        assert_eq!(vm.f, 0);
        assert_eq!(vm.v[10], 9);
    }

    #[test]
    fn test_jz_reads_flags_not_accumulator() {
        // A is nonzero but F is zero: JZ must take the branch.
        let text = "LDA 1\nSUB 1\nLDA 7\nJZ done\nLDA 99\nSTAP 1\ntag done\nSTAP 0\nHALT\n";
        let vm = run_program(text).unwrap();
        assert_eq!(vm.p[0], 7);
        assert_eq!(vm.p[1], 0);
    }

    #[test]
    fn test_call_ret_and_stack() {
        let text = "\
LDA 20
CALL double
STAP 0
HALT
tag double
ADD 0
PUSH
POP
MUL 2
RET
";
        let vm = run_program(text).unwrap();
        assert_eq!(vm.p[0], 40);
    }

    #[test]
    fn test_push_pop_preserve_flags() {
        let vm = run_program("LDA 4\nSUB 4\nLDA 9\nPUSH\nLDA 1\nPOP\nHALT\n").unwrap();
        assert_eq!(vm.a, 9);
        assert_eq!(vm.f, 0);
    }

    #[test]
    fn test_divide_by_zero_faults() {
        let err = run_program("LDA 1\nDIV 0\nHALT\n").unwrap_err();
        assert!(matches!(err, VmError::DivideByZero { pc: 1 }));
    }

    #[test]
    fn test_step_limit() {
        let program = Program::load("tag spin\nJMP spin\n").unwrap();
        let mut vm = Vm::new();
        vm.step_limit = 1000;
        let err = vm.run(&program, &mut NoHost).unwrap_err();
        assert_eq!(err, VmError::StepLimit(1000));
    }

    #[test]
    fn test_negative_shift_semantics() {
        // SHR is arithmetic: sign bit propagates.
        let vm = run_program("LDA 0\nSUB 8\nSHR 31\nSTA v5\nAND 1\nHALT\n").unwrap();
        assert_eq!(vm.v[5], -1);
        assert_eq!(vm.a, 1);
    }

    #[test]
    fn test_variable_out_of_range_rejected() {
        let err = Program::load("LDA 1\nSTA v150\nHALT\n").unwrap_err();
        assert!(matches!(err, VmError::Load(_)));
    }

    #[test]
    fn test_too_many_tags_rejected() {
        let mut text = String::new();
        for i in 0..=MAX_TAGS {
            text.push_str(&format!("tag t{}\n", i));
        }
        text.push_str("HALT\n");
        let err = Program::load(&text).unwrap_err();
        assert!(matches!(err, VmError::Load(_)));
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let err = Program::load("tag a\nLDA 1\ntag a\nHALT\n").unwrap_err();
        assert!(matches!(err, VmError::Load(_)));
    }

    #[test]
    fn test_undefined_tag_rejected() {
        let err = Program::load("JMP nowhere\n").unwrap_err();
        assert!(matches!(err, VmError::Load(_)));
    }

    #[test]
    fn test_comments_ignored() {
        let vm = run_program("// header\nLDA 2 // trailing\nSTAP 3\nHALT\n").unwrap();
        assert_eq!(vm.p[3], 2);
    }

    #[test]
    fn test_memory_host_gpio() {
        let program = Program::load("LDA 0\nWRITE 23 1\nREAD 23\nSTAP 0\nHALT\n").unwrap();
        let mut vm = Vm::new();
        let mut host = MemoryHost::new();
        vm.run(&program, &mut host).unwrap();
        assert_eq!(host.pin(23), 1);
        assert_eq!(vm.p[0], 1);
        assert_eq!(host.calls[0], ("WRITE".to_string(), vec![23, 1]));
    }

    #[test]
    fn test_api_result_lands_in_accumulator() {
        let program = Program::load("HWVER\nSTAP 0\nHALT\n").unwrap();
        let mut vm = Vm::new();
        let mut host = MemoryHost::new();
        vm.run(&program, &mut host).unwrap();
        assert_eq!(vm.p[0], 17);
    }

    #[test]
    fn test_no_host_rejects_api() {
        let program = Program::load("READ 4\nHALT\n").unwrap();
        let mut vm = Vm::new();
        let err = vm.run(&program, &mut NoHost).unwrap_err();
        assert!(matches!(err, VmError::Api { pc: 0, .. }));
    }
}
