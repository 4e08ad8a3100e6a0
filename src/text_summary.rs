//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for finished jobs and engine descriptions.

use crate::engine::ImportedMesh;
use crate::metrics;
use crate::model::{FinalizedResult, Operator};
use crate::registry::{AlgorithmDescriptor, EnvironmentProbe};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary for a successful job.
pub(crate) fn build_text_summary(
    result: &FinalizedResult,
    descriptor: &AlgorithmDescriptor,
    imported: Option<&ImportedMesh>,
) -> TextSummary {
    let mut lines = vec![
        format!("Result: {}", result.name),
        format!(
            "Operation: {} ({})",
            result.operator, descriptor.display_name
        ),
        format!(
            "File: {} ({})",
            result.canonical_path.display(),
            result.format
        ),
        format!(
            "Backend time: {:.3} s",
            result.backend_elapsed.as_secs_f64()
        ),
    ];
    if let Some(mesh) = imported {
        lines.push(format!(
            "Imported as: {} ({})",
            mesh.name,
            mesh.location.display()
        ));
    }
    if !result.finished_utc.is_empty() {
        lines.push(format!("Finished: {}", result.finished_utc));
    }
    TextSummary { lines }
}

/// Describe an engine, with a runtime estimate when `triangles` is given.
pub(crate) fn build_engine_summary(
    descriptor: &AlgorithmDescriptor,
    env: &dyn EnvironmentProbe,
    triangles: Option<u64>,
) -> TextSummary {
    let executable = descriptor
        .resolve_executable(env)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".into());
    let mut lines = vec![
        format!("{} ({})", descriptor.display_name, descriptor.id),
        format!("License: {}", descriptor.license_label),
        format!(
            "Formats: reads {}, writes {}",
            descriptor.required_input_format, descriptor.output_format
        ),
        format!(
            "Available: {} (markers: {})",
            if descriptor.is_available(env) { "yes" } else { "no" },
            descriptor.markers.join(", ")
        ),
        format!("Executable: {executable}"),
    ];

    for op in Operator::ALL {
        let quality = metrics::mean(descriptor.benchmarks.quality(op))
            .map(|q| format!("{q:.3}"))
            .unwrap_or_else(|| "-".into());
        let mut line = format!("{:<12} mean quality {quality}", op.display_name());
        if let Some(n) = triangles {
            match metrics::estimate_seconds(descriptor.benchmarks.seconds(op), n) {
                Some(secs) => line.push_str(&format!(", ~{secs:.2} s for {n} triangles")),
                None => line.push_str(&format!(", no estimate for {n} triangles")),
            }
        }
        lines.push(line);
    }
    TextSummary { lines }
}
