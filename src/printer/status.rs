use std::fmt;
use std::str::FromStr;

/// Coarse printer state the screen switches views on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrinterState {
    Disconnected,
    Startup,
    Ready,
    Printing,
    Paused,
    Shutdown,
    Error,
}

impl PrinterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterState::Disconnected => "disconnected",
            PrinterState::Startup => "startup",
            PrinterState::Ready => "ready",
            PrinterState::Printing => "printing",
            PrinterState::Paused => "paused",
            PrinterState::Shutdown => "shutdown",
            PrinterState::Error => "error",
        }
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown printer state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for PrinterState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(PrinterState::Disconnected),
            "startup" => Ok(PrinterState::Startup),
            "ready" => Ok(PrinterState::Ready),
            "printing" => Ok(PrinterState::Printing),
            "paused" => Ok(PrinterState::Paused),
            "shutdown" => Ok(PrinterState::Shutdown),
            "error" => Ok(PrinterState::Error),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Derive the coarse state from `webhooks.state` and `print_stats.state`.
///
/// Anything other than a ready Klippy wins outright. Only a ready Klippy
/// looks at the print job.
pub fn evaluate(webhooks_state: &str, print_stats_state: Option<&str>) -> Result<PrinterState, UnknownState> {
    let webhooks = webhooks_state.parse::<PrinterState>()?;
    if webhooks != PrinterState::Ready {
        return Ok(webhooks);
    }
    Ok(match print_stats_state {
        Some("paused") => PrinterState::Paused,
        Some("printing") => PrinterState::Printing,
        _ => PrinterState::Ready,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_job_overrides_ready() {
        assert_eq!(evaluate("ready", Some("printing")), Ok(PrinterState::Printing));
        assert_eq!(evaluate("ready", Some("paused")), Ok(PrinterState::Paused));
        assert_eq!(evaluate("ready", Some("complete")), Ok(PrinterState::Ready));
        assert_eq!(evaluate("ready", None), Ok(PrinterState::Ready));
    }

    #[test]
    fn test_klippy_faults_dominate() {
        assert_eq!(evaluate("shutdown", Some("printing")), Ok(PrinterState::Shutdown));
        assert_eq!(evaluate("error", Some("paused")), Ok(PrinterState::Error));
        assert_eq!(evaluate("startup", Some("printing")), Ok(PrinterState::Startup));
    }

    #[test]
    fn test_unknown_webhooks_state() {
        assert_eq!(evaluate("melting", None), Err(UnknownState("melting".to_string())));
        assert_eq!("printing".parse::<PrinterState>().unwrap().to_string(), "printing");
    }
}
