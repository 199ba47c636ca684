//! Tests for progress quantization and milestone events

use serde_json::json;

use super::fixtures::{assert_close, kinds, partial, printing_printer, progress};
use crate::events::{EventKind, PrinterEvent};
use crate::printer::{PROGRESS_STEP, Printer, quantize_progress};

#[test]
fn test_quantize_floors_to_step() {
    assert_eq!(PROGRESS_STEP, 0.05);
    assert_close(Some(quantize_progress(0.0)), 0.0);
    assert_close(Some(quantize_progress(0.07)), 0.05);
    assert_close(Some(quantize_progress(0.049)), 0.0);
    assert_close(Some(quantize_progress(0.5)), 0.5);
    assert_close(Some(quantize_progress(0.99)), 0.95);
    assert_close(Some(quantize_progress(1.0)), 1.0);
}

#[test]
fn test_first_milestone_after_print_start() {
    let mut printer = Printer::new();

    let events = printer.update(&partial(json!({"print_stats": {"state": "printing"}})));
    assert_eq!(kinds(&events), vec![EventKind::StateChanged]);

    // Baseline: no event for 0.0
    let events = progress(&mut printer, 0.0);
    assert!(events.is_empty());
    assert_close(printer.progress(), 0.0);

    let events = progress(&mut printer, 0.07);
    assert_eq!(kinds(&events), vec![EventKind::ProgressChanged]);
    let PrinterEvent::ProgressChanged(snapshot) = &events[0] else {
        panic!("Expected ProgressChanged");
    };
    assert_close(snapshot.progress, 0.05);
}

#[test]
fn test_paused_progress_is_not_recorded() {
    let mut printer = Printer::new();
    printer.update(&partial(json!({"print_stats": {"state": "printing"}})));
    progress(&mut printer, 0.0);
    printer.update(&partial(json!({"print_stats": {"state": "paused"}})));

    let events = progress(&mut printer, 0.07);

    assert!(events.is_empty());
    assert_close(printer.progress(), 0.0);
}

#[test]
fn test_resumed_print_catches_up() {
    let mut printer = printing_printer();
    printer.update(&partial(json!({"print_stats": {"state": "paused"}})));
    assert!(progress(&mut printer, 0.32).is_empty());

    printer.update(&partial(json!({"print_stats": {"state": "printing"}})));
    let events = progress(&mut printer, 0.32);

    assert_eq!(kinds(&events), vec![EventKind::ProgressChanged]);
    assert_close(printer.progress(), 0.3);
}

#[test]
fn test_milestones_are_monotonic_and_unique() {
    let mut printer = Printer::new();
    printer.update(&partial(json!({"print_stats": {"state": "printing"}})));

    let mut emitted = Vec::new();
    for raw in [0.01, 0.03, 0.06, 0.08, 0.12, 0.12, 0.51, 0.99] {
        for event in progress(&mut printer, raw) {
            emitted.push(event.snapshot().progress);
        }
    }

    assert_eq!(emitted.len(), 4);
    for (actual, expected) in emitted.iter().zip([0.05, 0.1, 0.5, 0.95]) {
        assert_close(*actual, expected);
    }
}

#[test]
fn test_repeated_value_fires_once() {
    let mut printer = printing_printer();
    assert_eq!(progress(&mut printer, 0.26).len(), 1);
    assert!(progress(&mut printer, 0.26).is_empty());
    assert!(progress(&mut printer, 0.29).is_empty());
}

#[test]
fn test_no_events_outside_printing() {
    for state in ["standby", "complete", "cancelled", "error"] {
        let mut printer = Printer::new();
        printer.update(&partial(json!({"print_stats": {"state": state}})));

        let mut events = Vec::new();
        for raw in [0.0, 0.2, 0.4, 1.0] {
            events.extend(progress(&mut printer, raw));
        }
        assert!(events.is_empty(), "state {state} emitted {events:?}");
    }
}

#[test]
fn test_first_value_is_baseline_even_when_idle() {
    let mut printer = Printer::new();
    printer.update(&partial(json!({"print_stats": {"state": "standby"}})));

    progress(&mut printer, 0.32);

    assert_close(printer.progress(), 0.3);
}

#[test]
fn test_decrease_resets_baseline_silently() {
    let mut printer = printing_printer();
    progress(&mut printer, 0.81);
    assert_close(printer.progress(), 0.8);

    let events = progress(&mut printer, 0.12);

    assert!(events.is_empty());
    assert_close(printer.progress(), 0.1);
}

#[test]
fn test_lingering_full_progress_carries_into_next_print() {
    // Previous job finished at 100%; the firmware still reports it
    let mut printer = printing_printer();
    progress(&mut printer, 1.0);
    printer.update(&partial(json!({"print_stats": {"state": "complete"}})));
    assert_close(printer.progress(), 1.0);

    // Next job starts before the firmware clears progress
    printer.update(&partial(json!({"print_stats": {"state": "printing"}})));
    assert!(progress(&mut printer, 1.0).is_empty());
    assert_close(printer.progress(), 1.0);

    // The reset to zero is taken as a new baseline, then milestones resume
    assert!(progress(&mut printer, 0.0).is_empty());
    assert_close(printer.progress(), 0.0);
    assert_eq!(progress(&mut printer, 0.05).len(), 1);
}

#[test]
fn test_missing_or_non_numeric_progress_is_untouched() {
    let mut printer = printing_printer();
    progress(&mut printer, 0.22);

    let events = printer.update(&partial(json!({"display_status": {"progress": "n/a"}})));
    assert!(events.is_empty());
    assert_close(printer.progress(), 0.2);

    printer.reset();
    let events = printer.update(&partial(json!({"display_status": {"message": null}})));
    assert!(events.is_empty());
    assert_eq!(printer.progress(), None);
}

#[test]
fn test_progress_uses_merged_value() {
    let mut printer = printing_printer();
    progress(&mut printer, 0.22);

    // Touching display_status without progress re-evaluates the stored raw value
    let events = printer.update(&partial(json!({"display_status": {"message": null}})));

    assert!(events.is_empty());
    assert_close(printer.progress(), 0.2);
}
