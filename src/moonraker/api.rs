//! Request helpers the panels call. Every helper returns whether the request
//! actually went out; callbacks are optional.

use serde_json::{Map, Value};

use super::correlator::RpcCallback;
use super::gcodes;
use super::rpc::RpcMethod;
use super::websocket::KlippyWebsocket;

impl KlippyWebsocket {
    pub fn gcode_script(&mut self, script: &str, callback: Option<RpcCallback>) -> bool {
        tracing::debug!("Sending G-code script: {}", script);
        self.send_method(RpcMethod::GcodeScript { script: script.to_string() }, callback)
    }

    pub fn emergency_stop(&mut self) -> bool {
        tracing::warn!("Sending printer.emergency_stop");
        self.send_method(RpcMethod::EmergencyStop, None)
    }

    /// Subscribe to the given objects; a `null` field list means every field.
    pub fn object_subscription(&mut self, objects: Map<String, Value>, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::ObjectsSubscribe { objects }, callback)
    }

    pub fn objects_query(&mut self, objects: Map<String, Value>, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::ObjectsQuery { objects }, callback)
    }

    pub fn objects_list(&mut self, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::ObjectsList, callback)
    }

    pub fn printer_info(&mut self, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::PrinterInfo, callback)
    }

    pub fn server_info(&mut self, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::ServerInfo, callback)
    }

    pub fn get_file_list(&mut self, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::FilesList { root: "gcodes".to_string() }, callback)
    }

    pub fn get_file_metadata(&mut self, filename: &str, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::FilesMetadata { filename: filename.to_string() }, callback)
    }

    pub fn get_file_dir(&mut self, path: &str, callback: Option<RpcCallback>) -> bool {
        self.send_method(
            RpcMethod::FilesGetDirectory { path: path.to_string(), extended: true },
            callback,
        )
    }

    pub fn delete_file(&mut self, filename: &str, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::FilesDelete { path: format!("gcodes/{}", filename) }, callback)
    }

    pub fn print_start(&mut self, filename: &str) -> bool {
        tracing::info!("Starting print: {}", filename);
        self.send_method(RpcMethod::PrintStart { filename: filename.to_string() }, None)
    }

    pub fn print_pause(&mut self) -> bool {
        self.send_method(RpcMethod::PrintPause, None)
    }

    pub fn print_resume(&mut self) -> bool {
        self.send_method(RpcMethod::PrintResume, None)
    }

    pub fn print_cancel(&mut self) -> bool {
        self.send_method(RpcMethod::PrintCancel, None)
    }

    pub fn restart(&mut self) -> bool {
        self.send_method(RpcMethod::PrinterRestart, None)
    }

    pub fn restart_firmware(&mut self) -> bool {
        self.send_method(RpcMethod::FirmwareRestart, None)
    }

    pub fn power_device_on(&mut self, device: &str, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::DevicePowerOn { device: device.to_string() }, callback)
    }

    pub fn power_device_off(&mut self, device: &str, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::DevicePowerOff { device: device.to_string() }, callback)
    }

    pub fn get_power_devices(&mut self, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::DevicePowerDevices, callback)
    }

    pub fn temperature_store(&mut self, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::TemperatureStore { include_monitors: false }, callback)
    }

    pub fn gcode_store(&mut self, count: u32, callback: Option<RpcCallback>) -> bool {
        self.send_method(RpcMethod::GcodeStore { count }, callback)
    }

    pub fn set_heater_temp(&mut self, heater: &str, target: f64) -> bool {
        self.gcode_script(&gcodes::set_heater_temp(heater, target), None)
    }

    pub fn set_tool_temp(&mut self, tool: usize, target: f64) -> bool {
        self.gcode_script(&gcodes::set_tool_temp(tool, target), None)
    }

    pub fn set_bed_temp(&mut self, target: f64) -> bool {
        self.gcode_script(&gcodes::set_bed_temp(target), None)
    }

    pub fn set_temp_fan_temp(&mut self, fan: &str, target: f64) -> bool {
        self.gcode_script(&gcodes::set_temp_fan_temp(fan, target), None)
    }

    /// `fan` is the config section name; the part fan takes M106.
    pub fn set_fan_speed(&mut self, fan: &str, speed: f64) -> bool {
        let script = if fan == "fan" {
            gcodes::set_fan_speed(speed)
        } else {
            gcodes::set_generic_fan_speed(fan, speed)
        };
        self.gcode_script(&script, None)
    }

    pub fn set_speed_factor(&mut self, percent: f64) -> bool {
        self.gcode_script(&gcodes::set_speed_factor(percent), None)
    }

    pub fn set_extrusion_factor(&mut self, percent: f64) -> bool {
        self.gcode_script(&gcodes::set_extrusion_factor(percent), None)
    }

    /// `distance` in mm, negative to retract; `speed` in mm/min.
    pub fn extrude(&mut self, distance: f64, speed: f64) -> bool {
        self.gcode_script(&gcodes::extrude(distance, speed), None)
    }

    /// `pin` may carry its `output_pin` section prefix.
    pub fn set_output_pin(&mut self, pin: &str, value: f64) -> bool {
        self.gcode_script(&gcodes::set_output_pin(pin, value), None)
    }
}
