// src/screen/mod.rs - Screen event loop tying the client to the printer cache
//! The screen owns the Moonraker client, the printer cache, the file list
//! and the panel subscriptions. Transport events, marshaled RPC replies
//! and front-end requests all arrive on one `tokio::select!` loop, so no
//! state here is ever touched from two places at once.

pub mod events;
pub mod panel;

pub use events::{ScreenEvent, ScreenRequest, ScreenStatus};
pub use panel::{ConsolePanel, Panel, Subscriptions};

use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, PrinterEntry};
use crate::file_manager::FileManager;
use crate::moonraker::{ClientError, ConnectionNotice, KlippyWebsocket, RpcCallback, RpcReply, TransportEvent};
use crate::printer::{Printer, PrinterState};

#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("Unknown printer '{0}'")]
    UnknownPrinter(String),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Objects subscribed to whenever Klipper reports them.
const SUBSCRIBED_OBJECTS: [&str; 20] = [
    "bed_mesh",
    "configfile",
    "display_status",
    "exclude_object",
    "fan",
    "firmware_retraction",
    "gcode_move",
    "heater_bed",
    "idle_timeout",
    "manual_probe",
    "motion_report",
    "pause_resume",
    "print_stats",
    "probe",
    "quad_gantry_level",
    "system_stats",
    "toolhead",
    "virtual_sdcard",
    "webhooks",
    "z_tilt",
];

/// Section types subscribed to for every named instance.
const SUBSCRIBED_TYPES: [&str; 15] = [
    "controller_fan",
    "dotstar",
    "fan_generic",
    "filament_motion_sensor",
    "filament_switch_sensor",
    "heater_fan",
    "heater_generic",
    "led",
    "neopixel",
    "output_pin",
    "pca9533",
    "pca9632",
    "temperature_fan",
    "temperature_sensor",
    "tmc2209",
];

/// Build the `printer.objects.subscribe` argument from an objects list.
pub fn subscription_for(objects: &[&str]) -> Map<String, Value> {
    let mut subscription = Map::new();
    // Always wanted, even if the list came back short.
    subscription.insert("webhooks".to_string(), Value::Null);
    subscription.insert("configfile".to_string(), Value::Null);
    for &object in objects {
        let kind = object.split_whitespace().next().unwrap_or(object);
        if SUBSCRIBED_OBJECTS.contains(&object)
            || SUBSCRIBED_TYPES.contains(&kind)
            || kind.starts_with("extruder")
        {
            subscription.insert(object.to_string(), Value::Null);
        }
    }
    subscription
}

/// Which top-level view the state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Splash,
    MainMenu,
    JobStatus,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Splash => "splash_screen",
            View::MainMenu => "main_menu",
            View::JobStatus => "job_status",
        }
    }
}

pub struct Screen {
    config: Config,
    client: KlippyWebsocket,
    transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    events_tx: mpsc::UnboundedSender<ScreenEvent>,
    events_rx: mpsc::UnboundedReceiver<ScreenEvent>,
    printer: Printer,
    printer_info: Value,
    files: FileManager,
    subscriptions: Subscriptions,
    initialized: bool,
    view: View,
    message: String,
}

impl Screen {
    pub fn new(config: Config, printer_name: Option<&str>) -> Result<Self, ScreenError> {
        let entry = config
            .printer(printer_name)
            .ok_or_else(|| ScreenError::UnknownPrinter(printer_name.unwrap_or_default().to_string()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (client, transport_rx) = Self::build_client(&config, entry)?;
        let printer = Self::build_printer(&config, &events_tx);
        Ok(Self {
            config,
            client,
            transport_rx,
            events_tx,
            events_rx,
            printer,
            printer_info: Value::Null,
            files: FileManager::new(),
            subscriptions: Subscriptions::new(),
            initialized: false,
            view: View::Splash,
            message: String::new(),
        })
    }

    fn build_client(
        config: &Config,
        entry: PrinterEntry,
    ) -> Result<(KlippyWebsocket, mpsc::UnboundedReceiver<TransportEvent>), ClientError> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let client = KlippyWebsocket::new(entry, config.connection.clone(), transport_tx)?;
        Ok((client, transport_rx))
    }

    /// A fresh cache whose state changes are posted back onto the loop.
    fn build_printer(config: &Config, events: &mpsc::UnboundedSender<ScreenEvent>) -> Printer {
        let mut printer = Printer::with_store_size(config.main.temp_store_size);
        for state in [
            PrinterState::Disconnected,
            PrinterState::Startup,
            PrinterState::Ready,
            PrinterState::Printing,
            PrinterState::Paused,
            PrinterState::Shutdown,
            PrinterState::Error,
        ] {
            let events = events.clone();
            printer.on_state(
                state,
                Box::new(move |state| {
                    let _ = events.send(ScreenEvent::StateChanged(state));
                }),
            );
        }
        printer
    }

    pub fn client(&self) -> &KlippyWebsocket {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut KlippyWebsocket {
        &mut self.client
    }

    pub fn printer(&self) -> &Printer {
        &self.printer
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn subscribe(&mut self, panel: Box<dyn Panel>) {
        self.subscriptions.subscribe(panel);
    }

    pub fn connect(&mut self) {
        self.show_splash(format!("Connecting to {}", self.client.printer().name));
        self.client.initial_connect();
    }

    pub async fn run(mut self, mut requests: mpsc::Receiver<ScreenRequest>) -> Result<(), ScreenError> {
        let mut temp_tick = tokio::time::interval(self.config.main.temp_store_interval());
        temp_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.connect();

        loop {
            tokio::select! {
                Some(event) = self.transport_rx.recv() => self.handle_transport(event),
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                request = requests.recv() => match request {
                    Some(request) => {
                        if !self.handle_request(request) {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Request channel closed");
                        break;
                    }
                },
                _ = temp_tick.tick() => {
                    if self.initialized {
                        self.printer.update_temp_store();
                    }
                }
            }
        }

        self.client.close();
        tracing::info!("Screen loop stopped");
        Ok(())
    }

    pub fn handle_transport(&mut self, event: TransportEvent) {
        match self.client.handle_event(event) {
            None => {}
            Some(ConnectionNotice::Connected) => {
                self.show_splash("Initializing printer...".to_string());
                self.init_printer();
            }
            Some(ConnectionNotice::Status(status)) => self.show_splash(status),
            Some(ConnectionNotice::Lost(reason)) => self.websocket_disconnected(&reason),
            Some(ConnectionNotice::Failed(status)) => {
                tracing::error!("{}", status);
                self.show_splash(status);
            }
            Some(ConnectionNotice::Notification { method, payload }) => self.handle_notification(&method, &payload),
        }
    }

    /// Drain marshaled replies without waiting. Returns how many were handled.
    pub fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn forward(&self, wrap: fn(RpcReply) -> ScreenEvent) -> Option<RpcCallback> {
        let events = self.events_tx.clone();
        Some(Box::new(move |reply| {
            let _ = events.send(wrap(reply));
        }))
    }

    fn init_printer(&mut self) {
        self.initialized = false;
        let callback = self.forward(ScreenEvent::PrinterInfo);
        if !self.client.printer_info(callback) {
            tracing::warn!("Cannot query printer info while disconnected");
        }
    }

    pub fn handle_event(&mut self, event: ScreenEvent) {
        match event {
            ScreenEvent::PrinterInfo(reply) => self.on_printer_info(reply),
            ScreenEvent::ObjectsList(reply) => self.on_objects_list(reply),
            ScreenEvent::Subscribed(reply) => self.on_subscribed(reply),
            ScreenEvent::TemperatureStore(reply) => match reply.into_result() {
                Ok(result) => self.printer.init_temp_store(&result),
                Err(e) => tracing::warn!("Temperature store unavailable: {}", e),
            },
            ScreenEvent::FileList(reply) => match reply.into_result() {
                Ok(result) => self.files.load_list(&result),
                Err(e) => tracing::warn!("File list unavailable: {}", e),
            },
            ScreenEvent::FileMetadata(reply) => match reply.into_result() {
                Ok(result) => {
                    if let Some(filename) = result.get("filename").and_then(Value::as_str) {
                        self.files.set_metadata(filename, &result);
                    }
                }
                Err(e) => tracing::debug!("No metadata: {}", e),
            },
            ScreenEvent::PowerDevices(reply) => match reply.into_result() {
                Ok(result) => self.printer.configure_power_devices(&result),
                Err(e) => tracing::debug!("No power devices: {}", e),
            },
            ScreenEvent::GcodeHelp(Some(help)) => self.printer.set_available_commands(&help),
            ScreenEvent::GcodeHelp(None) => tracing::debug!("G-code help unavailable"),
            ScreenEvent::StateChanged(state) => self.on_printer_state(state),
        }
    }

    fn on_printer_info(&mut self, reply: RpcReply) {
        let info = match reply.into_result() {
            Ok(info) => info,
            Err(message) => {
                tracing::warn!("printer.info failed: {}", message);
                self.set_klippy_state("disconnected", &message);
                return;
            }
        };
        let state = info.get("state").and_then(Value::as_str).unwrap_or("disconnected").to_string();
        if state != "ready" {
            // Moonraker announces notify_klippy_ready once Klippy gets there.
            let message = info
                .get("state_message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tracing::info!("Klippy is {}: {}", state, message);
            self.set_klippy_state(&state, &message);
            return;
        }
        self.printer_info = info;
        let callback = self.forward(ScreenEvent::ObjectsList);
        self.client.objects_list(callback);
    }

    fn on_objects_list(&mut self, reply: RpcReply) {
        let result = match reply.into_result() {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("printer.objects.list failed: {}", e);
                return;
            }
        };
        let objects: Vec<&str> = result
            .get("objects")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let subscription = subscription_for(&objects);
        tracing::debug!("Subscribing to {} objects", subscription.len());
        let callback = self.forward(ScreenEvent::Subscribed);
        self.client.object_subscription(subscription, callback);
    }

    fn on_subscribed(&mut self, reply: RpcReply) {
        let result = match reply.into_result() {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("printer.objects.subscribe failed: {}", e);
                return;
            }
        };
        let status = result.get("status").cloned().unwrap_or_else(|| json!({}));
        if let Err(e) = self.printer.reinit(&self.printer_info, &status) {
            tracing::error!("Cannot initialize printer: {}", e);
            return;
        }
        self.initialized = true;
        // reinit only reports transitions, a reconnect to the same state
        // still needs its view.
        self.on_printer_state(self.printer.state());

        let callback = self.forward(ScreenEvent::TemperatureStore);
        self.client.temperature_store(callback);
        let callback = self.forward(ScreenEvent::FileList);
        self.client.get_file_list(callback);
        let callback = self.forward(ScreenEvent::PowerDevices);
        self.client.get_power_devices(callback);

        let rest = self.client.rest().clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let help = rest.get_gcode_help().await;
            let _ = events.send(ScreenEvent::GcodeHelp(help));
        });
    }

    fn set_klippy_state(&mut self, state: &str, message: &str) {
        self.printer
            .process_update(&json!({"webhooks": {"state": state, "state_message": message}}));
    }

    fn websocket_disconnected(&mut self, reason: &str) {
        self.initialized = false;
        self.set_klippy_state("disconnected", reason);
        self.show_splash(reason.to_string());
        self.client.initial_connect();
    }

    /// React to a Moonraker notification, then fan it out to every panel.
    pub fn handle_notification(&mut self, method: &str, payload: &Value) {
        match method {
            "notify_klippy_disconnected" => {
                self.initialized = false;
                self.set_klippy_state("disconnected", "Klipper has disconnected");
            }
            "notify_klippy_shutdown" => self.set_klippy_state("shutdown", "Klipper has shutdown"),
            "notify_klippy_ready" => self.init_printer(),
            "notify_status_update" => {
                if self.printer.state() != PrinterState::Shutdown {
                    self.printer.process_update(payload);
                }
            }
            "notify_filelist_changed" => {
                if let Some(change) = self.files.process_update(payload) {
                    if let Some(path) = change.needs_metadata() {
                        let path = path.to_string();
                        let callback = self.forward(ScreenEvent::FileMetadata);
                        self.client.get_file_metadata(&path, callback);
                    }
                }
            }
            "notify_metadata_update" => {
                if let Some(filename) = payload.get("filename").and_then(Value::as_str) {
                    self.files.set_metadata(filename, payload);
                }
            }
            "notify_power_changed" => self.printer.process_power_update(payload),
            "notify_gcode_response" => {
                if let Some(line) = payload.as_str() {
                    if line.starts_with("!! ") {
                        tracing::warn!("Klipper: {}", line);
                    }
                }
            }
            _ => tracing::trace!("Unhandled notification {}", method),
        }
        self.subscriptions.broadcast(method, payload);
    }

    fn on_printer_state(&mut self, state: PrinterState) {
        let reason = self
            .printer
            .get_stat("webhooks", Some("state_message"))
            .as_str()
            .unwrap_or_default()
            .to_string();
        match state {
            PrinterState::Ready => self.show_view(View::MainMenu),
            PrinterState::Printing | PrinterState::Paused => self.show_view(View::JobStatus),
            PrinterState::Startup => self.show_splash("Klipper is attempting to start".to_string()),
            PrinterState::Disconnected => self.show_splash(format!("Klipper has disconnected\n\n{}", reason)),
            PrinterState::Shutdown => self.show_splash(format!("Klipper has shutdown\n\n{}", reason)),
            PrinterState::Error => self.show_splash(format!("Klipper has encountered an error.\n\n{}", reason)),
        }
    }

    fn show_view(&mut self, view: View) {
        if self.view != view {
            tracing::info!("Showing {}", view.as_str());
        }
        self.view = view;
        self.message.clear();
    }

    fn show_splash(&mut self, message: String) {
        let message = message.trim_end().to_string();
        if self.view != View::Splash || self.message != message {
            tracing::info!("{}", message.replace('\n', " "));
        }
        self.view = View::Splash;
        self.message = message;
    }

    /// Returns false when the loop should stop.
    pub fn handle_request(&mut self, request: ScreenRequest) -> bool {
        tracing::debug!("Request: {:?}", request);
        match request {
            ScreenRequest::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            ScreenRequest::Gcode { script, respond_to } => {
                if !self.client.is_connected() {
                    let _ = respond_to.send(Err("Not connected to Moonraker".to_string()));
                    return true;
                }
                let callback: RpcCallback = Box::new(move |reply| {
                    let _ = respond_to.send(reply.into_result().map(|_| ()));
                });
                self.client.gcode_script(&script, Some(callback));
            }
            ScreenRequest::PauseJob => {
                self.client.print_pause();
            }
            ScreenRequest::ResumeJob => {
                self.client.print_resume();
            }
            ScreenRequest::CancelJob => {
                self.client.print_cancel();
            }
            ScreenRequest::EmergencyStop => {
                tracing::warn!("Emergency stop requested");
                self.client.emergency_stop();
            }
            ScreenRequest::Retry => self.client.retry(),
            ScreenRequest::SelectPrinter { name, respond_to } => {
                let _ = respond_to.send(self.select_printer(&name));
            }
            ScreenRequest::Subscribe { panel } => self.subscriptions.subscribe(panel),
            ScreenRequest::Shutdown => {
                tracing::info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Drop the current connection and caches, then connect to `name`.
    pub fn select_printer(&mut self, name: &str) -> Result<(), String> {
        let entry = self
            .config
            .printer(Some(name))
            .ok_or_else(|| ScreenError::UnknownPrinter(name.to_string()).to_string())?;
        self.client.close();
        let (client, transport_rx) = Self::build_client(&self.config, entry).map_err(|e| e.to_string())?;
        self.client = client;
        self.transport_rx = transport_rx;
        self.printer = Self::build_printer(&self.config, &self.events_tx);
        self.printer_info = Value::Null;
        self.files = FileManager::new();
        self.initialized = false;
        tracing::info!("Switched to printer {}", name);
        self.connect();
        Ok(())
    }

    pub fn status(&self) -> ScreenStatus {
        ScreenStatus {
            printer: self.client.printer().name.clone(),
            connection: self.client.state().to_string(),
            state: self.printer.state().to_string(),
            view: self.view.as_str().to_string(),
            message: self.message.clone(),
            pending_calls: self.client.pending_calls(),
            files: self.files.len(),
            data: self.printer.get_printer_status_data(),
        }
    }
}
