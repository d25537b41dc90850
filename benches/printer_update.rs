// Benchmark for status update merging and temperature sampling
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use krusty_screen::printer::Printer;
use serde_json::{Value, json};
use std::hint::black_box;

fn snapshot() -> Value {
    let mut config = serde_json::Map::new();
    for section in ["extruder", "extruder1", "heater_bed", "fan", "temperature_sensor mcu", "heater_generic chamber"] {
        config.insert(section.to_string(), json!({}));
    }
    json!({
        "configfile": {"config": config},
        "webhooks": {"state": "ready"},
        "print_stats": {"state": "printing"},
    })
}

fn bench_process_update(c: &mut Criterion) {
    let mut printer = Printer::new();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    let updates: Vec<Value> = (0..1000)
        .map(|i| {
            json!({
                "extruder": {"temperature": 200.0 + (i % 10) as f64 * 0.1, "power": 0.45},
                "heater_bed": {"temperature": 60.0},
                "toolhead": {"position": [i as f64, i as f64, 0.2, 0.0]},
            })
        })
        .collect();
    c.bench_function("merge 1000 status updates", |b| {
        b.iter(|| {
            for update in &updates {
                black_box(printer.process_update(update));
            }
        });
    });
}

fn bench_state_updates(c: &mut Criterion) {
    let mut printer = Printer::new();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    let paused = json!({"print_stats": {"state": "paused"}});
    let printing = json!({"print_stats": {"state": "printing"}});
    c.bench_function("toggle print state", |b| {
        b.iter(|| {
            black_box(printer.process_update(&paused));
            black_box(printer.process_update(&printing));
        });
    });
}

fn bench_temp_store(c: &mut Criterion) {
    let mut printer = Printer::new();
    printer.reinit(&json!({}), &snapshot()).unwrap();
    printer.process_update(&json!({"extruder": {"temperature": 210.0, "target": 210.0, "power": 0.5}}));
    c.bench_function("sample temperature store", |b| {
        b.iter(|| printer.update_temp_store());
    });
}

criterion_group!(benches, bench_process_update, bench_state_updates, bench_temp_store);
criterion_main!(benches);
