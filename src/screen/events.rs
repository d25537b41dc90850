//! Messages that reach the screen loop from outside it.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use super::panel::Panel;
use crate::moonraker::RpcReply;
use crate::printer::PrinterState;

/// Replies and callbacks marshaled back onto the loop. RPC callbacks run
/// inside `handle_event` on the loop already, but they cannot borrow the
/// screen, so they post one of these instead.
#[derive(Debug)]
pub enum ScreenEvent {
    PrinterInfo(RpcReply),
    ObjectsList(RpcReply),
    Subscribed(RpcReply),
    TemperatureStore(RpcReply),
    FileList(RpcReply),
    FileMetadata(RpcReply),
    PowerDevices(RpcReply),
    GcodeHelp(Option<Value>),
    StateChanged(PrinterState),
}

/// Snapshot answered to `ScreenRequest::GetStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenStatus {
    pub printer: String,
    pub connection: String,
    pub state: String,
    pub view: String,
    pub message: String,
    pub pending_calls: usize,
    pub files: usize,
    pub data: Value,
}

/// Requests from the console or any other front-end task.
pub enum ScreenRequest {
    GetStatus {
        respond_to: oneshot::Sender<ScreenStatus>,
    },
    /// Ok once Klipper accepts the script, or an error when the script
    /// failed or no connection exists.
    Gcode {
        script: String,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
    PauseJob,
    ResumeJob,
    CancelJob,
    EmergencyStop,
    /// Restart the retry cycle after it gave up.
    Retry,
    SelectPrinter {
        name: String,
        respond_to: oneshot::Sender<Result<(), String>>,
    },
    Subscribe {
        panel: Box<dyn Panel>,
    },
    Shutdown,
}

impl std::fmt::Debug for ScreenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScreenRequest::GetStatus { .. } => f.write_str("GetStatus"),
            ScreenRequest::Gcode { script, .. } => write!(f, "Gcode({})", script),
            ScreenRequest::PauseJob => f.write_str("PauseJob"),
            ScreenRequest::ResumeJob => f.write_str("ResumeJob"),
            ScreenRequest::CancelJob => f.write_str("CancelJob"),
            ScreenRequest::EmergencyStop => f.write_str("EmergencyStop"),
            ScreenRequest::Retry => f.write_str("Retry"),
            ScreenRequest::SelectPrinter { name, .. } => write!(f, "SelectPrinter({})", name),
            ScreenRequest::Subscribe { panel } => write!(f, "Subscribe({})", panel.name()),
            ScreenRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}
