// src/printer/mod.rs - Cached view of the Klipper object model
//! Snapshot of Klipper object state as reported by Moonraker, plus the
//! derived values the panels read: coarse state, device lists and counts,
//! power devices and temperature history.

pub mod status;
pub mod temperature;

pub use status::{PrinterState, UnknownState};
pub use temperature::{Series, TempStore};

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Printer data is not an object")]
    InvalidData,
}

/// Called with the state being entered.
pub type StateCallback = Box<dyn FnMut(PrinterState) + Send>;

/// Objects whose updates can move the coarse state.
const STATE_OBJECTS: [&str; 3] = ["webhooks", "print_stats", "idle_timeout"];
const FAN_TYPES: [&str; 3] = ["controller_fan", "fan_generic", "heater_fan"];
const LED_TYPES: [&str; 5] = ["led", "neopixel", "dotstar", "pca9533", "pca9632"];
const FILAMENT_SENSOR_TYPES: [&str; 2] = ["filament_switch_sensor", "filament_motion_sensor"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCounts {
    pub extruders: usize,
    pub temperature_devices: usize,
    pub fans: usize,
    pub leds: usize,
    pub output_pins: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerDevice {
    pub name: String,
    pub status: String,
    pub device_type: String,
    pub locked_while_printing: bool,
}

impl PowerDevice {
    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            name: value.get("device")?.as_str()?.to_string(),
            status: value.get("status").and_then(Value::as_str).unwrap_or("off").to_string(),
            device_type: value.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
            locked_while_printing: value
                .get("locked_while_printing")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// `heater_generic _hidden` and friends are kept out of lists and counts.
fn is_hidden(section: &str) -> bool {
    section
        .split_whitespace()
        .last()
        .is_some_and(|name| name.starts_with('_'))
}

fn section_type(section: &str) -> &str {
    section.split_whitespace().next().unwrap_or(section)
}

fn empty() -> Value {
    Value::Object(Map::new())
}

pub struct Printer {
    data: Map<String, Value>,
    config: Map<String, Value>,
    state: PrinterState,
    state_callbacks: HashMap<PrinterState, Vec<StateCallback>>,
    klipper_version: Option<String>,
    tools: Vec<String>,
    counts: DeviceCounts,
    available_commands: BTreeMap<String, String>,
    power_devices: BTreeMap<String, PowerDevice>,
    temp_store: TempStore,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    pub fn new() -> Self {
        Self::with_store_size(temperature::DEFAULT_STORE_SIZE)
    }

    pub fn with_store_size(size: usize) -> Self {
        Self {
            data: Map::new(),
            config: Map::new(),
            state: PrinterState::Disconnected,
            state_callbacks: HashMap::new(),
            klipper_version: None,
            tools: Vec::new(),
            counts: DeviceCounts::default(),
            available_commands: BTreeMap::new(),
            power_devices: BTreeMap::new(),
            temp_store: TempStore::new(size),
        }
    }

    /// Rebuild everything from a fresh snapshot. Derived lists and counters
    /// are cleared first, so the same input always gives the same result.
    pub fn reinit(&mut self, printer_info: &Value, data: &Value) -> Result<(), PrinterError> {
        if !data.is_object() {
            return Err(PrinterError::InvalidData);
        }
        self.data = Map::new();
        self.config = data
            .get("configfile")
            .and_then(|c| c.get("config"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.tools.clear();
        self.counts = DeviceCounts::default();
        self.temp_store.clear();
        self.klipper_version = printer_info
            .get("software_version")
            .and_then(Value::as_str)
            .map(str::to_string);

        for section in self.config.keys() {
            let kind = section_type(section);
            if section.starts_with("extruder") && !section.starts_with("extruder_stepper") {
                self.tools.push(section.clone());
                self.counts.extruders += 1;
                continue;
            }
            if is_hidden(section) {
                continue;
            }
            if section == "heater_bed"
                || matches!(kind, "heater_generic" | "temperature_sensor" | "temperature_fan")
            {
                self.counts.temperature_devices += 1;
            }
            if section == "fan" || FAN_TYPES.contains(&kind) {
                self.counts.fans += 1;
            }
            if kind == "output_pin" {
                self.counts.output_pins += 1;
            }
            if LED_TYPES.contains(&kind) && section.contains(' ') {
                self.counts.leds += 1;
            }
        }
        self.tools.sort();

        for device in self.get_temp_devices() {
            let series: &[Series] = if device.starts_with("temperature_sensor") {
                &[Series::Temperatures]
            } else if device.starts_with("temperature_fan") {
                &[Series::Temperatures, Series::Targets]
            } else {
                &Series::ALL
            };
            self.temp_store.add_device(&device, series);
        }

        self.process_update(data);
        tracing::info!(
            "Klipper version: {}",
            self.klipper_version.as_deref().unwrap_or("unknown")
        );
        tracing::info!("# Extruders: {}", self.counts.extruders);
        tracing::info!("# Temperature devices: {}", self.counts.temperature_devices);
        tracing::info!("# Fans: {}", self.counts.fans);
        tracing::info!("# Output pins: {}", self.counts.output_pins);
        tracing::info!("# Leds: {}", self.counts.leds);
        Ok(())
    }

    /// Shallow merge of each object's fields into the snapshot. Returns the
    /// new state when the merge caused a transition.
    pub fn process_update(&mut self, data: &Value) -> Option<PrinterState> {
        let Some(update) = data.as_object() else {
            tracing::warn!("Ignoring printer update that is not an object");
            return None;
        };
        for (name, fields) in update {
            let Some(fields) = fields.as_object() else {
                tracing::debug!("Ignoring non-object update for '{}'", name);
                continue;
            };
            let entry = self.data.entry(name.clone()).or_insert_with(empty);
            match entry {
                Value::Object(existing) => {
                    for (field, value) in fields {
                        existing.insert(field.clone(), value.clone());
                    }
                }
                other => *other = Value::Object(fields.clone()),
            }
        }
        if STATE_OBJECTS.iter().any(|name| update.contains_key(*name)) {
            return self.process_status_update();
        }
        None
    }

    /// Coarse state derived from the snapshot as it is right now. `None`
    /// while Klippy has not reported a recognizable state.
    pub fn evaluate_state(&self) -> Option<PrinterState> {
        let webhooks = self.data.get("webhooks")?.get("state")?.as_str()?;
        let job = self
            .data
            .get("print_stats")
            .and_then(|p| p.get("state"))
            .and_then(Value::as_str)
            .or_else(|| {
                // Older Klipper only exposes the job through idle_timeout.
                self.data
                    .get("idle_timeout")
                    .and_then(|i| i.get("state"))
                    .and_then(Value::as_str)
                    .filter(|s| s.eq_ignore_ascii_case("printing"))
                    .map(|_| "printing")
            });
        match status::evaluate(webhooks, job) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    pub fn process_status_update(&mut self) -> Option<PrinterState> {
        let state = self.evaluate_state()?;
        if state == self.state {
            return None;
        }
        self.change_state(state);
        Some(state)
    }

    /// Enter `state` and run its callbacks.
    pub fn change_state(&mut self, state: PrinterState) {
        if state != self.state {
            tracing::debug!("Changing state from '{}' to '{}'", self.state, state);
            self.state = state;
        }
        if let Some(callbacks) = self.state_callbacks.get_mut(&state) {
            for callback in callbacks.iter_mut() {
                callback(state);
            }
        }
    }

    pub fn on_state(&mut self, state: PrinterState, callback: StateCallback) {
        self.state_callbacks.entry(state).or_default().push(callback);
    }

    pub fn state(&self) -> PrinterState {
        self.state
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// `{}` when the object or field is unknown, never an error. Treat an
    /// empty object as "unknown" rather than zero.
    pub fn get_stat(&self, stat: &str, substat: Option<&str>) -> Value {
        let Some(object) = self.data.get(stat) else {
            return empty();
        };
        match substat {
            None => object.clone(),
            Some(field) => object.get(field).cloned().unwrap_or_else(empty),
        }
    }

    pub fn get_dev_stat(&self, device: &str, field: &str) -> Option<f64> {
        self.data.get(device)?.get(field)?.as_f64()
    }

    pub fn klipper_version(&self) -> Option<&str> {
        self.klipper_version.as_deref()
    }

    pub fn counts(&self) -> DeviceCounts {
        self.counts
    }

    pub fn get_config_section_list(&self, prefix: &str) -> Vec<String> {
        self.config
            .keys()
            .filter(|section| section.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn get_config_section(&self, section: &str) -> Option<&Map<String, Value>> {
        self.config.get(section)?.as_object()
    }

    pub fn section_exists(&self, section: &str) -> bool {
        self.config.contains_key(section)
    }

    fn visible_sections(&self, kinds: &[&str]) -> Vec<String> {
        self.config
            .keys()
            .filter(|section| section.contains(' ') && kinds.contains(&section_type(section)) && !is_hidden(section))
            .cloned()
            .collect()
    }

    pub fn get_tools(&self) -> &[String] {
        &self.tools
    }

    pub fn get_tool_number(&self, tool: &str) -> Option<usize> {
        self.tools.iter().position(|t| t == tool)
    }

    pub fn get_heaters(&self) -> Vec<String> {
        let mut heaters = Vec::new();
        if self.section_exists("heater_bed") {
            heaters.push("heater_bed".to_string());
        }
        heaters.extend(self.visible_sections(&["heater_generic"]));
        heaters
    }

    pub fn get_temp_devices(&self) -> Vec<String> {
        let mut devices = self.tools.clone();
        devices.extend(self.get_heaters());
        devices.extend(self.visible_sections(&["temperature_sensor", "temperature_fan"]));
        devices
    }

    pub fn get_fans(&self) -> Vec<String> {
        let mut fans = Vec::new();
        if self.section_exists("fan") {
            fans.push("fan".to_string());
        }
        fans.extend(self.visible_sections(&FAN_TYPES));
        fans
    }

    pub fn get_output_pins(&self) -> Vec<String> {
        self.visible_sections(&["output_pin"])
    }

    pub fn get_leds(&self) -> Vec<String> {
        self.visible_sections(&LED_TYPES)
    }

    pub fn get_filament_sensors(&self) -> Vec<String> {
        self.visible_sections(&FILAMENT_SENSOR_TYPES)
    }

    pub fn get_gcode_macros(&self) -> Vec<String> {
        self.visible_sections(&["gcode_macro"])
            .into_iter()
            .filter_map(|section| section.split_once(' ').map(|(_, name)| name.to_string()))
            .collect()
    }

    /// Summary the panels use to decide which menus to offer.
    pub fn get_printer_status_data(&self) -> Value {
        let macros = self.get_gcode_macros();
        json!({
            "moonraker": {
                "power_devices": { "count": self.power_devices.len() },
            },
            "printer": {
                "state": self.state.as_str(),
                "klipper_version": self.klipper_version,
                "extruders": { "count": self.counts.extruders },
                "temperature_devices": { "count": self.counts.temperature_devices },
                "fans": { "count": self.counts.fans },
                "output_pins": { "count": self.counts.output_pins },
                "leds": { "count": self.counts.leds },
                "gcode_macros": { "count": macros.len(), "list": macros },
                "filament_sensors": { "count": self.get_filament_sensors().len() },
                "bed_mesh": self.section_exists("bed_mesh"),
                "bltouch": self.section_exists("bltouch"),
                "probe": self.section_exists("probe"),
                "quad_gantry_level": self.section_exists("quad_gantry_level"),
                "z_tilt": self.section_exists("z_tilt"),
                "firmware_retraction": self.section_exists("firmware_retraction"),
                "input_shaper": self.section_exists("input_shaper"),
                "pause_resume": { "is_paused": self.state == PrinterState::Paused },
            },
        })
    }

    /// Accepts the REST `printer/gcode/help` body or its `result`.
    pub fn set_available_commands(&mut self, help: &Value) {
        let commands = help.get("result").unwrap_or(help);
        self.available_commands = commands
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(cmd, desc)| (cmd.clone(), desc.as_str().unwrap_or_default().to_string()))
                    .collect()
            })
            .unwrap_or_default();
        tracing::debug!("{} G-code commands available", self.available_commands.len());
    }

    pub fn available_commands(&self) -> &BTreeMap<String, String> {
        &self.available_commands
    }

    /// Load the `machine.device_power.devices` result.
    pub fn configure_power_devices(&mut self, result: &Value) {
        self.power_devices = result
            .get("devices")
            .and_then(Value::as_array)
            .map(|devices| {
                devices
                    .iter()
                    .filter_map(PowerDevice::from_value)
                    .filter(|d| !d.name.starts_with('_'))
                    .map(|d| (d.name.clone(), d))
                    .collect()
            })
            .unwrap_or_default();
        tracing::info!("Power devices: {}", self.power_devices.len());
    }

    /// Apply a `notify_power_changed` payload.
    pub fn process_power_update(&mut self, data: &Value) {
        match PowerDevice::from_value(data) {
            Some(device) => {
                if let Some(known) = self.power_devices.get_mut(&device.name) {
                    known.status = device.status;
                }
            }
            None => tracing::debug!("Ignoring malformed power update: {}", data),
        }
    }

    pub fn get_power_devices(&self) -> Vec<&PowerDevice> {
        self.power_devices.values().collect()
    }

    pub fn get_power_device_status(&self, device: &str) -> Option<&str> {
        self.power_devices.get(device).map(|d| d.status.as_str())
    }

    pub fn init_temp_store(&mut self, result: &Value) {
        self.temp_store.load(result);
    }

    /// Record the current reading of every tracked series.
    pub fn update_temp_store(&mut self) {
        let data = &self.data;
        self.temp_store
            .sample(|device, field| data.get(device)?.get(field)?.as_f64());
    }

    pub fn temp_store(&self) -> &TempStore {
        &self.temp_store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Value {
        json!({
            "configfile": {"config": {
                "extruder": {}, "extruder1": {}, "extruder_stepper belt": {},
                "heater_bed": {}, "heater_generic chamber": {}, "heater_generic _hidden": {},
                "temperature_sensor mcu": {}, "temperature_fan electronics": {},
                "fan": {}, "heater_fan hotend": {}, "controller_fan _board": {},
                "output_pin beeper": {}, "output_pin _private": {},
                "neopixel strip": {}, "led status": {},
                "gcode_macro PRINT_START": {}, "gcode_macro _HELPER": {},
                "filament_switch_sensor runout": {},
            }},
            "webhooks": {"state": "ready"},
            "print_stats": {"state": "standby"},
        })
    }

    #[test]
    fn test_reinit_counts_devices() {
        let mut printer = Printer::with_store_size(10);
        printer.reinit(&json!({"software_version": "v0.12.0"}), &snapshot()).unwrap();
        assert_eq!(
            printer.counts(),
            DeviceCounts { extruders: 2, temperature_devices: 4, fans: 2, leds: 2, output_pins: 1 }
        );
        assert_eq!(printer.get_tools(), &["extruder".to_string(), "extruder1".to_string()]);
        assert_eq!(printer.get_tool_number("extruder1"), Some(1));
        assert_eq!(printer.get_tool_number("extruder_stepper belt"), None);
        assert_eq!(printer.get_gcode_macros(), vec!["PRINT_START".to_string()]);
        assert_eq!(printer.get_filament_sensors(), vec!["filament_switch_sensor runout".to_string()]);
        assert_eq!(printer.klipper_version(), Some("v0.12.0"));
        assert_eq!(printer.state(), PrinterState::Ready);

        let devices: Vec<&str> = printer.temp_store().devices().collect();
        assert!(devices.contains(&"heater_generic chamber"));
        assert!(!devices.contains(&"heater_generic _hidden"));
        assert!(printer.temp_store().get("temperature_sensor mcu", Series::Targets).is_none());
    }

    #[test]
    fn test_reinit_is_idempotent() {
        let mut printer = Printer::new();
        printer.reinit(&json!({}), &snapshot()).unwrap();
        let first = printer.counts();
        printer.reinit(&json!({}), &snapshot()).unwrap();
        assert_eq!(printer.counts(), first);
        assert_eq!(printer.get_tools().len(), 2);
    }

    #[test]
    fn test_reinit_rejects_non_object() {
        let mut printer = Printer::new();
        assert!(matches!(printer.reinit(&json!({}), &json!([1])), Err(PrinterError::InvalidData)));
    }

    #[test]
    fn test_update_temp_store_samples_snapshot() {
        let mut printer = Printer::with_store_size(3);
        printer.reinit(&json!({}), &snapshot()).unwrap();
        printer.process_update(&json!({"heater_bed": {"temperature": 55.0, "target": 60.0}}));
        printer.update_temp_store();
        let temps = printer.temp_store().get("heater_bed", Series::Temperatures).unwrap();
        assert_eq!(temps.len(), 3);
        assert_eq!(temps.back(), Some(&55.0));
        let powers = printer.temp_store().get("heater_bed", Series::Powers).unwrap();
        assert_eq!(powers.back(), Some(&0.0));
    }

    #[test]
    fn test_power_devices() {
        let mut printer = Printer::new();
        printer.configure_power_devices(&json!({"devices": [
            {"device": "printer", "status": "off", "locked_while_printing": true, "type": "gpio"},
            {"device": "_internal", "status": "on"},
        ]}));
        assert_eq!(printer.get_power_devices().len(), 1);
        printer.process_power_update(&json!({"device": "printer", "status": "on"}));
        assert_eq!(printer.get_power_device_status("printer"), Some("on"));
        printer.process_power_update(&json!({"device": "unknown", "status": "on"}));
        assert_eq!(printer.get_power_device_status("unknown"), None);
    }
}
