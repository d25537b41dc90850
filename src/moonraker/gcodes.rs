// src/moonraker/gcodes.rs - G-code scripts sent on behalf of the setters

/// Sections that carry a heater prefix in their config name use the suffix
/// as the heater name, e.g. `heater_generic chamber` -> `chamber`.
fn object_name(device: &str) -> &str {
    device.split_once(' ').map(|(_, name)| name).unwrap_or(device)
}

pub fn set_heater_temp(heater: &str, target: f64) -> String {
    format!("SET_HEATER_TEMPERATURE HEATER={} TARGET={}", object_name(heater), target)
}

pub fn set_tool_temp(tool: usize, target: f64) -> String {
    format!("M104 T{} S{}", tool, target)
}

pub fn set_bed_temp(target: f64) -> String {
    format!("M140 S{}", target)
}

pub fn set_temp_fan_temp(fan: &str, target: f64) -> String {
    format!("SET_TEMPERATURE_FAN_TARGET temperature_fan={} target={}", object_name(fan), target)
}

/// `speed` is a percentage.
pub fn set_fan_speed(speed: f64) -> String {
    let pwm = (speed.clamp(0.0, 100.0) * 255.0 / 100.0).round() as u32;
    format!("M106 S{}", pwm)
}

pub fn set_generic_fan_speed(fan: &str, speed: f64) -> String {
    format!("SET_FAN_SPEED FAN={} SPEED={}", object_name(fan), speed.clamp(0.0, 100.0) / 100.0)
}

pub fn set_speed_factor(percent: f64) -> String {
    format!("M220 S{}", percent)
}

pub fn set_extrusion_factor(percent: f64) -> String {
    format!("M221 S{}", percent)
}

pub fn extrude(distance: f64, speed: f64) -> String {
    format!("G1 E{} F{}", distance, speed)
}

pub fn set_output_pin(pin: &str, value: f64) -> String {
    format!("SET_PIN PIN={} VALUE={}", object_name(pin), value)
}
