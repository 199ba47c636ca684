//! Human readable status text.

use std::fmt::Write;

use crate::printer::{PrinterSnapshot, PrinterState};

/// Format a duration in seconds as `Ns`, `MM:SS`, `HH:MM:SS` or
/// `D days HH:MM:SS`, whichever is the shortest that fits.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Whole seconds, clamped at zero
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (days, rest) = (total / 86_400, total % 86_400);
    let (hours, rest) = (rest / 3_600, rest % 3_600);
    let (minutes, seconds) = (rest / 60, rest % 60);

    if days > 0 {
        format!("{days} days {hours:02}:{minutes:02}:{seconds:02}")
    } else if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}s")
    }
}

/// Filament length in millimetres as metres with one decimal.
#[must_use]
pub fn format_filament_length(millimetres: f64) -> String {
    format!("{:.1}m", millimetres * 0.001)
}

/// Remaining time extrapolated from elapsed time and fractional progress
#[must_use]
pub fn estimate_remaining(print_duration: f64, progress: f64) -> Option<f64> {
    (progress > 0.0).then(|| print_duration * (1.0 / progress - 1.0))
}

fn temperature_line(out: &mut String, label: &str, snapshot: &PrinterSnapshot, subsystem: &str) {
    let Some(temperature) = snapshot.f64_field(subsystem, "temperature") else {
        return;
    };
    let target = snapshot.f64_field(subsystem, "target").unwrap_or(0.0);
    let _ = writeln!(out, "{label}: {temperature:.2}°C ({target:.2}°C)");
}

/// Multi-line status summary of a snapshot.
///
/// Lines for subsystems that have not reported yet are left out.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // Whole percent
pub fn status_text(snapshot: &PrinterSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "state: {}", snapshot.state);

    temperature_line(&mut out, "extruder", snapshot, "extruder");
    temperature_line(&mut out, "bed", snapshot, "heater_bed");

    let job_state = snapshot
        .str_field("print_stats", "state")
        .map_or_else(|| snapshot.state.clone(), PrinterState::from);
    if !job_state.has_job() {
        return out;
    }

    if let Some(filename) = snapshot.str_field("print_stats", "filename") {
        let _ = writeln!(out, "file: {filename}");
    }

    let progress = snapshot.f64_field("virtual_sdcard", "progress");
    if let Some(progress) = progress {
        let _ = writeln!(out, "progress: {}%", (progress * 100.0) as i64);
    }

    if let Some(duration) = snapshot.f64_field("print_stats", "print_duration") {
        let _ = writeln!(out, "print duration: {}", format_time(duration));
        if let Some(remaining) = progress.and_then(|p| estimate_remaining(duration, p)) {
            let _ = writeln!(out, "estimated: {}", format_time(remaining));
        }
    }

    if let Some(filament) = snapshot.f64_field("print_stats", "filament_used") {
        let _ = writeln!(out, "filament used: {}", format_filament_length(filament));
    }

    out
}
