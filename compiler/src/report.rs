// report.rs — Machine-readable expansion report
//
// The wrapper generator consumes the list of expanded kernels (names,
// parameter roles, output form) rather than the IR itself. The report also
// carries the provenance of the compilation so downstream caches can key on
// it.
//
// Preconditions: the summary came from running the expansion pass on the
//                module whose source the provenance hashes.
// Postconditions: kernels appear in registration order.
// Failure modes: none beyond JSON serialization.
// Side effects: none.

use serde::Serialize;

use crate::expand::{ExpandOptions, ExpandSummary, ExpandedKernel};
use crate::exposure::Exposure;
use crate::ir::TbaaDomain;
use crate::pipeline::Provenance;
use crate::types::PointerWidth;

/// Bumped whenever a field changes meaning.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionReport {
    pub schema_version: u32,
    pub compiler_version: &'static str,
    pub source_hash: String,
    pub options_fingerprint: String,
    pub target: String,
    pub static_steps: bool,
    pub exposure: Exposure,
    pub tbaa: TbaaDomain,
    pub kernels: Vec<ExpandedKernel>,
    pub skipped: Vec<String>,
}

impl ExpansionReport {
    pub fn new(
        summary: &ExpandSummary,
        provenance: &Provenance,
        target: PointerWidth,
        options: &ExpandOptions,
    ) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            compiler_version: provenance.compiler_version,
            source_hash: provenance.source_hash_hex(),
            options_fingerprint: provenance.options_fingerprint_hex(),
            target: target.to_string(),
            static_steps: options.static_steps,
            exposure: summary.exposure,
            tbaa: summary.tbaa,
            kernels: summary.kernels.clone(),
            skipped: summary.skipped.clone(),
        }
    }

    /// Pretty JSON with a trailing newline, for `--emit report`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string_pretty(self)?;
        s.push('\n');
        Ok(s)
    }
}
