// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the parsed module AST and source text are set before calling
//                run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; expansion
//                certificate failure.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::Instant;

use crate::ast::ModuleAst;
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::expand::{verify_expansion, ExpandError, ExpandOptions, ExpandPass, ExpandSummary};
use crate::ir::Module;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::report::ExpansionReport;

// ── Artifact storage ───────────────────────────────────────────────────────

pub struct Artifacts {
    pub ast: ModuleAst,
    /// Resolved module; verified after `Verify`, expanded in place by `Expand`.
    pub module: Option<Module>,
    pub summary: Option<ExpandSummary>,
    pub report: Option<ExpansionReport>,
}

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.kir` source text.
/// `options_fingerprint`: SHA-256 of the compact JSON of the expansion options.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the options fingerprint (64 characters).
    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and expansion options.
///
/// The options fingerprint hashes compact JSON (no whitespace) so it is
/// stable independent of display formatting.
pub fn compute_provenance(source: &str, options: &ExpandOptions) -> Provenance {
    let canonical = serde_json::to_string(options).unwrap_or_default();
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub artifacts: Artifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Provenance,
}

impl CompilationState {
    pub fn new(ast: ModuleAst, source: &str, options: &ExpandOptions) -> Self {
        Self {
            artifacts: Artifacts {
                ast,
                module: None,
                summary: None,
                report: None,
            },
            diagnostics: Vec::new(),
            has_error: false,
            provenance: compute_provenance(source, options),
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helper: check diagnostics for errors ───────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
/// Returns Err if error diagnostics were found.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "kxc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn expand_error_diag(err: &ExpandError) -> Diagnostic {
    let code = match err {
        ExpandError::Plan(_) => codes::E0400,
        ExpandError::Malformed(_) | ExpandError::BrokenOutput(_) => codes::E0300,
        _ => codes::E0401,
    };
    let diag = Diagnostic::new(DiagLevel::Error, None, err.to_string()).with_code(code);
    match err {
        ExpandError::Plan(_) => {
            diag.with_hint("the kernel's parameters do not match its export signature")
        }
        _ => diag,
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Preconditions: `state.artifacts.ast` is set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; expansion cert failure.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &ExpandOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Resolve => {
                let result = crate::resolve::resolve(&state.artifacts.ast);
                state.artifacts.module = Some(result.module);
                result.diagnostics
            }
            PassId::Verify => match state.artifacts.module.as_ref() {
                Some(module) => match crate::verify::verify_module(module) {
                    Ok(()) => Vec::new(),
                    Err(errors) => errors
                        .iter()
                        .map(|e| {
                            Diagnostic::new(DiagLevel::Error, None, e.to_string())
                                .with_code(codes::E0300)
                        })
                        .collect(),
                },
                None => vec![missing_artifact("module")],
            },
            PassId::Expand => match state.artifacts.module.as_mut() {
                Some(module) => match ExpandPass::new(options.clone()).run(module) {
                    Ok(summary) => {
                        let cert = verify_expansion(module, &summary);
                        state.artifacts.summary = Some(summary);
                        if cert.all_pass() {
                            Vec::new()
                        } else {
                            let failed: Vec<_> = cert
                                .obligations()
                                .iter()
                                .filter(|(_, ok)| !ok)
                                .map(|(name, _)| *name)
                                .collect();
                            vec![Diagnostic::new(
                                DiagLevel::Error,
                                None,
                                format!("expansion verification failed: {}", failed.join(", ")),
                            )
                            .with_code(codes::E0402)]
                        }
                    }
                    Err(err) => vec![expand_error_diag(&err)],
                },
                None => vec![missing_artifact("module")],
            },
            PassId::Report => match (&state.artifacts.summary, &state.artifacts.module) {
                (Some(summary), Some(module)) => {
                    state.artifacts.report = Some(ExpansionReport::new(
                        summary,
                        &state.provenance,
                        module.pointer_width,
                        options,
                    ));
                    Vec::new()
                }
                _ => vec![missing_artifact("expansion summary")],
            },
        };
        let elapsed = t.elapsed();
        finish_pass(
            state,
            pass_id,
            diags,
            elapsed,
            verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

fn missing_artifact(what: &str) -> Diagnostic {
    Diagnostic::new(
        DiagLevel::Error,
        None,
        format!("internal error: {} not available", what),
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────
