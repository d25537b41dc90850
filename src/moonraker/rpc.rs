//! JSON-RPC 2.0 framing and the closed set of Moonraker methods the screen calls.

use serde::Serialize;
use serde_json::{Map, Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Every Moonraker method the screen knows how to call, with typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMethod {
    EmergencyStop,
    GcodeScript { script: String },
    ObjectsList,
    /// Object name mapped to a field list, or `null` for every field.
    ObjectsQuery { objects: Map<String, Value> },
    ObjectsSubscribe { objects: Map<String, Value> },
    PrintStart { filename: String },
    PrintPause,
    PrintResume,
    PrintCancel,
    PrinterInfo,
    PrinterRestart,
    FirmwareRestart,
    ServerInfo,
    ServerConfig,
    ServerRestart,
    TemperatureStore { include_monitors: bool },
    GcodeStore { count: u32 },
    FilesList { root: String },
    FilesMetadata { filename: String },
    FilesGetDirectory { path: String, extended: bool },
    FilesDelete { path: String },
    DevicePowerDevices,
    DevicePowerOn { device: String },
    DevicePowerOff { device: String },
    MachineSystemInfo,
    MachineReboot,
    MachineShutdown,
    ConnectionIdentify { client_name: String, version: String },
}

impl RpcMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMethod::EmergencyStop => "printer.emergency_stop",
            RpcMethod::GcodeScript { .. } => "printer.gcode.script",
            RpcMethod::ObjectsList => "printer.objects.list",
            RpcMethod::ObjectsQuery { .. } => "printer.objects.query",
            RpcMethod::ObjectsSubscribe { .. } => "printer.objects.subscribe",
            RpcMethod::PrintStart { .. } => "printer.print.start",
            RpcMethod::PrintPause => "printer.print.pause",
            RpcMethod::PrintResume => "printer.print.resume",
            RpcMethod::PrintCancel => "printer.print.cancel",
            RpcMethod::PrinterInfo => "printer.info",
            RpcMethod::PrinterRestart => "printer.restart",
            RpcMethod::FirmwareRestart => "printer.firmware_restart",
            RpcMethod::ServerInfo => "server.info",
            RpcMethod::ServerConfig => "server.config",
            RpcMethod::ServerRestart => "server.restart",
            RpcMethod::TemperatureStore { .. } => "server.temperature_store",
            RpcMethod::GcodeStore { .. } => "server.gcode_store",
            RpcMethod::FilesList { .. } => "server.files.list",
            RpcMethod::FilesMetadata { .. } => "server.files.metadata",
            RpcMethod::FilesGetDirectory { .. } => "server.files.get_directory",
            RpcMethod::FilesDelete { .. } => "server.files.delete_file",
            RpcMethod::DevicePowerDevices => "machine.device_power.devices",
            RpcMethod::DevicePowerOn { .. } => "machine.device_power.on",
            RpcMethod::DevicePowerOff { .. } => "machine.device_power.off",
            RpcMethod::MachineSystemInfo => "machine.system_info",
            RpcMethod::MachineReboot => "machine.reboot",
            RpcMethod::MachineShutdown => "machine.shutdown",
            RpcMethod::ConnectionIdentify { .. } => "server.connection.identify",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            RpcMethod::GcodeScript { script } => json!({ "script": script }),
            RpcMethod::ObjectsQuery { objects } | RpcMethod::ObjectsSubscribe { objects } => {
                json!({ "objects": objects })
            }
            RpcMethod::PrintStart { filename } => json!({ "filename": filename }),
            RpcMethod::TemperatureStore { include_monitors } => {
                json!({ "include_monitors": include_monitors })
            }
            RpcMethod::GcodeStore { count } => json!({ "count": count }),
            RpcMethod::FilesList { root } => json!({ "root": root }),
            RpcMethod::FilesMetadata { filename } => json!({ "filename": filename }),
            RpcMethod::FilesGetDirectory { path, extended } => {
                json!({ "path": path, "extended": extended })
            }
            RpcMethod::FilesDelete { path } => json!({ "path": path }),
            // Moonraker takes the device name as the key.
            RpcMethod::DevicePowerOn { device } | RpcMethod::DevicePowerOff { device } => {
                let mut params = Map::new();
                params.insert(device.clone(), Value::Null);
                Value::Object(params)
            }
            RpcMethod::ConnectionIdentify { client_name, version } => json!({
                "client_name": client_name,
                "version": version,
                "type": "display",
                // Required by Moonraker; this client publishes no homepage.
                "url": "",
            }),
            _ => json!({}),
        }
    }
}

/// Outgoing request frame.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(method: &'a str, params: &'a Value, id: u64) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, method, params, id }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded incoming frame. Routing happens in the client, which needs the
/// pending table to tell a response from a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: Option<u64>,
    pub method: Option<String>,
    pub raw: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: Value = serde_json::from_str(text)?;
        if !raw.is_object() {
            return Err(FrameError::NotAnObject);
        }
        let id = raw.get("id").and_then(Value::as_u64);
        let method = raw.get("method").and_then(Value::as_str).map(str::to_string);
        Ok(Self { id, method, raw })
    }

    /// First element of `params`, or `{}` when there is none.
    pub fn notification_payload(&self) -> Value {
        match self.raw.get("params") {
            Some(Value::Array(items)) => items.first().cloned().unwrap_or_else(|| json!({})),
            _ => json!({}),
        }
    }
}

/// What a callback receives: the whole response frame plus the call it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub response: Value,
    pub method: String,
    pub params: Value,
}

impl RpcReply {
    pub fn result(&self) -> Option<&Value> {
        self.response.get("result")
    }

    pub fn error(&self) -> Option<&Value> {
        self.response.get("error")
    }

    /// Human readable error message, if the call failed.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error()?;
        Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        )
    }

    pub fn into_result(self) -> Result<Value, String> {
        if let Some(message) = self.error_message() {
            return Err(message);
        }
        Ok(self.response.get("result").cloned().unwrap_or(Value::Null))
    }
}
