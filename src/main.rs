// src/main.rs - Headless screen: console in, Moonraker out
use std::path::Path;

use clap::Parser;
use krusty_screen::config::{self, Config};
use krusty_screen::screen::{ConsolePanel, Screen, ScreenRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

const DEFAULT_CONFIG: &str = "krusty_screen.toml";

#[derive(Parser, Debug)]
#[command(name = "krusty-screen", version, about = "Moonraker front-end for Klipper printers")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Printer to connect to instead of the configured default
    #[arg(short, long)]
    printer: Option<String>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting Krusty Screen");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = if args.config == DEFAULT_CONFIG && !Path::new(DEFAULT_CONFIG).exists() {
        tracing::warn!("No {} found, using a local Moonraker on port 7125", DEFAULT_CONFIG);
        Config::default()
    } else {
        tracing::info!("Loading configuration from: {}", args.config);
        config::load_config(&args.config).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", args.config, e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
        })?
    };

    let mut screen = Screen::new(config, args.printer.as_deref())?;
    screen.subscribe(Box::new(ConsolePanel::default()));

    let (request_tx, request_rx) = mpsc::channel::<ScreenRequest>(16);

    let console_tx = request_tx.clone();
    tokio::spawn(async move {
        read_console(console_tx).await;
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            let _ = request_tx.send(ScreenRequest::Shutdown).await;
        }
    });

    screen.run(request_rx).await?;
    tracing::info!("Krusty Screen stopped");
    Ok(())
}

/// Each stdin line is a G-code script, except for a few screen commands.
async fn read_console(tx: mpsc::Sender<ScreenRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_ascii_uppercase();
        let sent = match upper.split_whitespace().next().unwrap_or_default() {
            "ESTOP" => tx.send(ScreenRequest::EmergencyStop).await,
            "RETRY" => tx.send(ScreenRequest::Retry).await,
            "PAUSE" => tx.send(ScreenRequest::PauseJob).await,
            "RESUME" => tx.send(ScreenRequest::ResumeJob).await,
            "CANCEL" => tx.send(ScreenRequest::CancelJob).await,
            "QUIT" => tx.send(ScreenRequest::Shutdown).await,
            "STATUS" => {
                let (respond_to, response) = oneshot::channel();
                let sent = tx.send(ScreenRequest::GetStatus { respond_to }).await;
                if let Ok(status) = response.await {
                    match serde_json::to_string_pretty(&status) {
                        Ok(text) => tracing::info!("{}", text),
                        Err(e) => tracing::warn!("Cannot render status: {}", e),
                    }
                }
                sent
            }
            "PRINTER" => {
                let name = line.split_once(' ').map(|(_, n)| n.trim().to_string()).unwrap_or_default();
                let (respond_to, response) = oneshot::channel();
                let sent = tx.send(ScreenRequest::SelectPrinter { name, respond_to }).await;
                if let Ok(Err(e)) = response.await {
                    tracing::warn!("{}", e);
                }
                sent
            }
            _ => {
                let (respond_to, response) = oneshot::channel();
                let script = line.to_string();
                let sent = tx.send(ScreenRequest::Gcode { script: script.clone(), respond_to }).await;
                // Long moves must not block the console.
                tokio::spawn(async move {
                    match response.await {
                        Ok(Ok(())) => tracing::debug!("{} ok", script),
                        Ok(Err(e)) => tracing::warn!("{}: {}", script, e),
                        Err(_) => tracing::warn!("{}: no reply", script),
                    }
                });
                sent
            }
        };
        if sent.is_err() {
            break;
        }
    }
}
