// src/lib.rs - Moonraker client and printer cache for a touchscreen front-end
pub mod config;
pub mod file_manager;
pub mod moonraker;
pub mod printer;
pub mod screen;

pub use config::{Config, PrinterEntry, load_config};
pub use moonraker::{ConnectionState, KlippyRest, KlippyWebsocket};
pub use printer::{Printer, PrinterState};
pub use screen::{Screen, ScreenRequest};
