// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded; handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    Verify,
    Expand,
    Report,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Module,   // ir::Module (resolved)
    Verified, // ir::Module passed verify_module
    Expanded, // ir::Module with .expand functions
    Summary,  // ExpandSummary
    Cert,     // ExpandCert
    Report,   // ExpansionReport
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Module],
            invalidation_key: "source",
            invariants: "all names bound, operand types agree with written types",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Verified],
            invalidation_key: "module",
            invariants: "blocks terminated, definitions dominate uses, exports defined",
        },
        PassId::Expand => PassDescriptor {
            name: "expand",
            inputs: &[PassId::Verify],
            outputs: &[ArtifactId::Expanded, ArtifactId::Summary, ArtifactId::Cert],
            invalidation_key: "module + expand_options",
            invariants: "one 4-parameter external .expand per expanded kernel, module verifies",
        },
        PassId::Report => PassDescriptor {
            name: "report",
            inputs: &[PassId::Expand],
            outputs: &[ArtifactId::Report],
            invalidation_key: "summary + provenance",
            invariants: "one entry per expanded kernel, in registration order",
        },
    }
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Resolve,
    PassId::Verify,
    PassId::Expand,
    PassId::Report,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
