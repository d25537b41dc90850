//! Integration tests for the printer state cache

use krusty_screen::printer::{Printer, PrinterState};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn snapshot() -> Value {
    json!({
        "configfile": {"config": {"extruder": {}, "heater_bed": {}, "fan": {}}},
        "webhooks": {"state": "ready", "state_message": "Printer is ready"},
        "print_stats": {"state": "standby", "filename": ""},
        "extruder": {"temperature": 21.5, "target": 0.0, "power": 0.0},
        "heater_bed": {"temperature": 22.0, "target": 0.0},
    })
}

fn recording_printer() -> (Printer, Arc<Mutex<Vec<PrinterState>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut printer = Printer::with_store_size(16);
    for state in [
        PrinterState::Disconnected,
        PrinterState::Startup,
        PrinterState::Ready,
        PrinterState::Printing,
        PrinterState::Paused,
        PrinterState::Shutdown,
        PrinterState::Error,
    ] {
        let seen = seen.clone();
        printer.on_state(state, Box::new(move |s| seen.lock().unwrap().push(s)));
    }
    (printer, seen)
}

#[test]
fn test_updates_merge_into_snapshot() {
    let mut printer = Printer::new();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    printer.process_update(&json!({"extruder": {"target": 210.0}}));

    let extruder = printer.get_stat("extruder", None);
    assert_eq!(extruder["temperature"], 21.5);
    assert_eq!(extruder["target"], 210.0);
    assert_eq!(extruder["power"], 0.0);
}

#[test]
fn test_missing_stats_are_empty_objects() {
    let mut printer = Printer::new();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    assert_eq!(printer.get_stat("toolhead", None), json!({}));
    assert_eq!(printer.get_stat("extruder", Some("pressure_advance")), json!({}));
    assert_eq!(printer.get_stat("print_stats", Some("filename")), json!(""));
}

#[test]
fn test_printing_overrides_ready() {
    let (mut printer, seen) = recording_printer();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    assert_eq!(printer.state(), PrinterState::Ready);

    let changed = printer.process_update(&json!({"print_stats": {"state": "printing"}}));
    assert_eq!(changed, Some(PrinterState::Printing));

    let changed = printer.process_update(&json!({"print_stats": {"state": "paused"}}));
    assert_eq!(changed, Some(PrinterState::Paused));

    printer.process_update(&json!({"print_stats": {"state": "complete"}}));
    assert_eq!(printer.state(), PrinterState::Ready);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![PrinterState::Ready, PrinterState::Printing, PrinterState::Paused, PrinterState::Ready]
    );
}

#[test]
fn test_callbacks_fire_once_per_transition() {
    let (mut printer, seen) = recording_printer();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    for _ in 0..5 {
        printer.process_update(&json!({"webhooks": {"state": "ready"}, "print_stats": {"state": "standby"}}));
    }
    assert_eq!(*seen.lock().unwrap(), vec![PrinterState::Ready]);
}

#[test]
fn test_shutdown_dominates_print_job() {
    let (mut printer, seen) = recording_printer();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    printer.process_update(&json!({"print_stats": {"state": "printing"}}));
    printer.process_update(&json!({"webhooks": {"state": "shutdown", "state_message": "MCU lost"}}));

    assert_eq!(printer.state(), PrinterState::Shutdown);
    assert_eq!(printer.get_stat("webhooks", Some("state_message")), json!("MCU lost"));
    assert_eq!(seen.lock().unwrap().last(), Some(&PrinterState::Shutdown));
}

#[test]
fn test_temperature_only_updates_do_not_evaluate_state() {
    let (mut printer, seen) = recording_printer();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    assert_eq!(printer.process_update(&json!({"extruder": {"temperature": 180.0}})), None);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(printer.get_dev_stat("extruder", "temperature"), Some(180.0));
}
