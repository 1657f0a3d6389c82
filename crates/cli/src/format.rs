//! Human-readable output for the CLI commands.

use dumpcycle_core::PartFile;
use dumpcycle_durability::VerifySummary;
use dumpcycle_engine::{CaptureOutcome, RotationOutcome, RotationReport};

use crate::inspect::CycleView;

const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

/// `1536` → `"1.50 KiB"`; values under 1 KiB stay in bytes.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Format the result of `run-once`.
pub fn format_capture(outcome: &CaptureOutcome) -> String {
    let mut lines = vec![
        format!(
            "{} capture: +{} (artifact {})",
            outcome.mode,
            format_bytes(outcome.bytes_written),
            format_bytes(outcome.artifact_size),
        ),
        format!("pointer: {}", outcome.pointer),
    ];
    if let Some(previous) = &outcome.log_switched_from {
        lines.push(format!("log switched from {}", previous));
    }
    lines.join("\n")
}

fn part_lines(parts: &[PartFile]) -> Vec<String> {
    parts
        .iter()
        .map(|part| format!("  {}  {}", part.name, format_bytes(part.size_bytes)))
        .collect()
}

/// Format the result of `split`.
pub fn format_split(parts: &[PartFile], summary: &VerifySummary) -> String {
    let mut lines = part_lines(parts);
    lines.push(format!(
        "{} part(s), {} verified",
        summary.part_count,
        format_bytes(summary.total_bytes)
    ));
    lines.join("\n")
}

/// Format the result of `rotate`.
pub fn format_report(report: &RotationReport) -> String {
    let mut lines = match &report.outcome {
        RotationOutcome::Completed {
            folder,
            parts,
            total_bytes,
        } => {
            let mut lines = vec![format!(
                "Rotation completed: {} part(s), {} -> {}",
                parts.len(),
                format_bytes(*total_bytes),
                folder.display()
            )];
            lines.extend(part_lines(parts));
            lines
        }
        RotationOutcome::Failed { stage, reason } => {
            vec![format!("Rotation failed at {}: {}", stage, reason)]
        }
        RotationOutcome::Skipped => {
            vec!["Rotation skipped: another rotation is running".to_string()]
        }
    };
    if let Some(period) = &report.period {
        lines.push(format!("period: {}", period));
    }
    if report.quiescence_timed_out {
        lines.push("warning: producer was still busy when the wait ran out".to_string());
    }
    if let Some(pointer) = &report.new_cycle {
        lines.push(format!("new cycle: {}", pointer));
    }
    lines.push(format!("run id: {}", report.id));
    lines.join("\n")
}

/// Format the result of `status`.
pub fn format_view(view: &CycleView) -> String {
    let service = if view.service_running { "running" } else { "stopped" };
    let pointer = match (&view.pointer, &view.state_error) {
        (_, Some(error)) => format!("unreadable ({})", error),
        (Some(pointer), None) => pointer.to_string(),
        (None, None) => "(none)".to_string(),
    };
    let artifact = view
        .artifact_size
        .map_or_else(|| "(none)".to_string(), format_bytes);

    let mut lines = vec![
        format!("database:      {}", view.database),
        format!("service:       {}", service),
        format!("next capture:  {}", view.next_mode),
        format!("pointer:       {}", pointer),
        format!("artifact:      {}", artifact),
    ];
    if view.rotation_enabled {
        lines.push(format!(
            "rotation:      daily at {}, parts up to {} GiB",
            view.split_time, view.max_file_size_gb
        ));
        if let Some(next) = view.next_rotation {
            lines.push(format!("next rotation: {}", next.format("%Y-%m-%d %H:%M")));
        }
    } else {
        lines.push("rotation:      disabled".to_string());
    }
    lines.push(format!("temp dir:      {}", view.temp_dir.display()));
    lines.push(format!("daily dir:     {}", view.daily_dir.display()));
    lines.push(match view.periods.last() {
        Some(latest) => format!(
            "archived:      {} period(s), latest {}",
            view.periods.len(),
            latest
        ),
        None => "archived:      (none)".to_string(),
    });
    lines.join("\n")
}
