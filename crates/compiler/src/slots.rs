//! Variable allocation
//!
//! Maps every C object to a VM variable slot. `v0` is the helper operand,
//! `v1..v3` the expression scratch stack, so user objects start at `v4`:
//!
//! - Globals are pinned first, from `v4` upward in declaration order.
//! - Each function gets a frame: parameters at offsets `0..arity`, then
//!   block-scoped locals with free-list reuse (a slot freed at scope exit
//!   is reused by later, non-overlapping scopes; shadowing declarations
//!   get fresh slots because the outer one is still live).
//! - Frames are laid out by call-graph layering: a callee's frame starts
//!   past the frame of every caller on any chain down to it, so a call
//!   never clobbers live locals. Functions not on a common chain overlap
//!   freely, which is what keeps small programs inside the 146 slots.
//!
//! Exceeding the 146 usable slots is not an error here; the high-water
//! mark is reported and the daemon rejects the upload.

use crate::ast::{Stmt, TopDecl, TranslationUnit};
use crate::call_graph::CallGraph;
use crate::error::CompileError;
use crate::resolver::{DeclId, DeclKind, Resolved};
use std::collections::HashMap;

/// First slot available to user objects (`v0..v3` are reserved).
pub const FIRST_SLOT: u32 = 4;
/// Number of slots usable by a program (`v4..v149`).
pub const USABLE_SLOTS: u32 = 146;

#[derive(Debug)]
pub struct Allocation {
    slots: HashMap<DeclId, u32>,
    /// Number of distinct slots the program reaches, counted from `v4`.
    pub used: u32,
}

impl Allocation {
    /// The slot assigned to an object declaration.
    pub fn slot(&self, decl: DeclId) -> Result<u32, CompileError> {
        self.slots.get(&decl).copied().ok_or_else(|| {
            CompileError::internal(format!("declaration {} was never allocated", decl))
        })
    }
}

pub fn allocate(
    unit: &TranslationUnit,
    resolved: &Resolved,
    graph: &CallGraph,
) -> Result<Allocation, CompileError> {
    let mut slots: HashMap<DeclId, u32> = HashMap::new();

    // Globals first, in declaration order (decl ids are in source order).
    let mut next = FIRST_SLOT;
    for (id, decl) in resolved.decls.iter().enumerate() {
        if matches!(decl.kind, DeclKind::Global { .. }) {
            slots.insert(id, next);
            next += 1;
        }
    }
    let globals_end = next;

    // Per-function frames: parameter offsets then scope-tracked locals.
    let mut frames: HashMap<DeclId, (HashMap<DeclId, u32>, u32)> = HashMap::new();
    for &(decl_id, index) in &resolved.functions {
        let TopDecl::Function(f) = &unit.decls[index] else {
            return Err(CompileError::internal("function index out of sync"));
        };
        let mut frame = Frame::new();
        if let Some(param_ids) = resolved.fn_params.get(&decl_id) {
            for &param in param_ids {
                let offset = frame.alloc();
                frame.offsets.insert(param, offset);
            }
        }
        let mut body_scope = Vec::new();
        for stmt in &f.body {
            frame.walk_stmt(stmt, resolved, &mut body_scope)?;
        }
        frame.release(body_scope);
        frames.insert(decl_id, (frame.offsets, frame.size));
    }

    // Layer frames along call chains: every caller's frame ends before any
    // of its callees' frames begin.
    let mut bases: HashMap<DeclId, u32> = HashMap::new();
    for &(decl_id, _) in &resolved.functions {
        bases.insert(decl_id, globals_end);
    }
    for caller in graph.topo_order() {
        let caller_end = bases.get(&caller).copied().unwrap_or(globals_end)
            + frames.get(&caller).map(|(_, size)| *size).unwrap_or(0);
        if let Some(callees) = graph.callees(caller) {
            for &callee in callees {
                if callee == caller {
                    continue; // waived self-recursion keeps its own base
                }
                let base = bases.entry(callee).or_insert(globals_end);
                *base = (*base).max(caller_end);
            }
        }
    }

    let mut high_water = globals_end;
    for (&function, (offsets, size)) in &frames {
        let base = bases.get(&function).copied().unwrap_or(globals_end);
        for (&decl, &offset) in offsets {
            slots.insert(decl, base + offset);
        }
        high_water = high_water.max(base + size);
    }

    Ok(Allocation {
        slots,
        used: high_water - FIRST_SLOT,
    })
}

/// Frame-local offset bookkeeping with a free list for scope reuse.
struct Frame {
    offsets: HashMap<DeclId, u32>,
    /// Freed offsets, kept sorted descending so pop() yields the lowest.
    free: Vec<u32>,
    next: u32,
    size: u32,
}

impl Frame {
    fn new() -> Self {
        Frame {
            offsets: HashMap::new(),
            free: Vec::new(),
            next: 0,
            size: 0,
        }
    }

    fn alloc(&mut self) -> u32 {
        if let Some(offset) = self.free.pop() {
            return offset;
        }
        let offset = self.next;
        self.next += 1;
        self.size = self.size.max(self.next);
        offset
    }

    fn release(&mut self, scope: Vec<u32>) {
        self.free.extend(scope);
        self.free.sort_unstable_by(|a, b| b.cmp(a));
    }

    /// Walk one statement, recording declarations into `scope` (the list
    /// of offsets to free when the enclosing scope ends).
    fn walk_stmt(
        &mut self,
        stmt: &Stmt,
        resolved: &Resolved,
        scope: &mut Vec<u32>,
    ) -> Result<(), CompileError> {
        match stmt {
            Stmt::Decl(vd) => {
                for declarator in &vd.vars {
                    let decl_id = resolved.def_ids.get(&declarator.id).copied().ok_or_else(
                        || {
                            CompileError::internal(format!(
                                "declarator '{}' was never resolved",
                                declarator.name
                            ))
                        },
                    )?;
                    let offset = self.alloc();
                    self.offsets.insert(decl_id, offset);
                    scope.push(offset);
                }
                Ok(())
            }
            Stmt::Compound(stmts, _) => {
                let mut inner = Vec::new();
                for s in stmts {
                    self.walk_stmt(s, resolved, &mut inner)?;
                }
                self.release(inner);
                Ok(())
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.walk_substmt(then_branch, resolved)?;
                if let Some(else_branch) = else_branch {
                    self.walk_substmt(else_branch, resolved)?;
                }
                Ok(())
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
                self.walk_substmt(body, resolved)
            }
            Stmt::For { init, body, .. } => {
                // The for header's declaration scopes over the body.
                let mut inner = Vec::new();
                if let Some(init) = init {
                    self.walk_stmt(init, resolved, &mut inner)?;
                }
                self.walk_substmt(body, resolved)?;
                self.release(inner);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// A branch or loop body forms its own scope even when not compound.
    fn walk_substmt(&mut self, stmt: &Stmt, resolved: &Resolved) -> Result<(), CompileError> {
        let mut inner = Vec::new();
        self.walk_stmt(stmt, resolved, &mut inner)?;
        self.release(inner);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::ApiTable;
    use crate::parser::parse_source;
    use crate::resolver::resolve;
    use std::path::PathBuf;

    fn alloc_src(source: &str) -> (Resolved, Allocation) {
        let mut next_id = 0;
        let (file, decls) =
            parse_source(source, PathBuf::from("test.c"), 0, &mut next_id).expect("parse failed");
        let unit = TranslationUnit {
            files: vec![file],
            decls,
        };
        let resolved = resolve(&unit, &ApiTable::standard()).expect("resolve failed");
        let graph = CallGraph::build(&unit, &resolved).expect("graph failed");
        graph.check_recursion(&unit, &resolved).expect("recursion");
        let allocation = allocate(&unit, &resolved, &graph).expect("allocate failed");
        (resolved, allocation)
    }

    fn slot_of(resolved: &Resolved, allocation: &Allocation, name: &str) -> u32 {
        let (id, _) = resolved
            .decls
            .iter()
            .enumerate()
            .find(|(_, d)| d.name == name && d.kind.is_object())
            .unwrap();
        allocation.slot(id).unwrap()
    }

    #[test]
    fn test_globals_pinned_from_v4() {
        let (resolved, allocation) = alloc_src("int a; int b; int c; int main() { return 0; }");
        assert_eq!(slot_of(&resolved, &allocation, "a"), 4);
        assert_eq!(slot_of(&resolved, &allocation, "b"), 5);
        assert_eq!(slot_of(&resolved, &allocation, "c"), 6);
    }

    #[test]
    fn test_shadowing_gets_distinct_slots() {
        let (resolved, allocation) =
            alloc_src("int main() { int a = 1; { int a = 2; a = a; } return 0; }");
        let slots: Vec<u32> = resolved
            .decls
            .iter()
            .enumerate()
            .filter(|(_, d)| d.name == "a")
            .map(|(id, _)| allocation.slot(id).unwrap())
            .collect();
        assert_eq!(slots.len(), 2);
        assert_ne!(slots[0], slots[1]);
    }

    #[test]
    fn test_sibling_scopes_reuse_slots() {
        let (resolved, allocation) =
            alloc_src("int main() { { int x = 1; x = x; } { int y = 2; y = y; } return 0; }");
        assert_eq!(
            slot_of(&resolved, &allocation, "x"),
            slot_of(&resolved, &allocation, "y")
        );
    }

    #[test]
    fn test_caller_and_callee_frames_disjoint() {
        let (resolved, allocation) = alloc_src(
            "int leaf(int n) { int t = n; return t; }\n\
             int main() { int a = 1; int b = 2; return leaf(a + b); }",
        );
        let a = slot_of(&resolved, &allocation, "a");
        let b = slot_of(&resolved, &allocation, "b");
        let n = slot_of(&resolved, &allocation, "n");
        let t = slot_of(&resolved, &allocation, "t");
        for caller_slot in [a, b] {
            for callee_slot in [n, t] {
                assert_ne!(caller_slot, callee_slot);
            }
        }
        assert!(n > b, "callee frame must start past the caller's");
    }

    #[test]
    fn test_unrelated_leaves_may_share_slots() {
        let (resolved, allocation) = alloc_src(
            "int first(int n) { return n; }\n\
             int second(int m) { return m; }\n\
             int main() { return first(1) + second(2); }",
        );
        assert_eq!(
            slot_of(&resolved, &allocation, "n"),
            slot_of(&resolved, &allocation, "m")
        );
    }

    #[test]
    fn test_parameters_precede_locals_in_frame() {
        let (resolved, allocation) = alloc_src(
            "int f(int a, int b) { int c = a + b; return c; }\n\
             int main() { return f(1, 2); }",
        );
        let a = slot_of(&resolved, &allocation, "a");
        let b = slot_of(&resolved, &allocation, "b");
        let c = slot_of(&resolved, &allocation, "c");
        assert_eq!(b, a + 1);
        assert_eq!(c, b + 1);
    }

    #[test]
    fn test_used_counts_high_water() {
        let (_, allocation) = alloc_src("int a; int b; int main() { int c = 0; return c; }");
        // Two globals plus main's single local.
        assert_eq!(allocation.used, 3);
    }

    #[test]
    fn test_extern_parameters_consume_no_slot() {
        let (_, allocation) =
            alloc_src("extern int p0; int main() { p0 = 1; return 0; }");
        assert_eq!(allocation.used, 0);
    }
}
