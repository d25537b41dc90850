//! Observer list for Moonraker notifications.

use serde_json::Value;

/// Anything that wants to see the notification stream.
pub trait Panel: Send {
    fn name(&self) -> &str;
    fn process_update(&mut self, action: &str, data: &Value);
}

#[derive(Default)]
pub struct Subscriptions {
    panels: Vec<Box<dyn Panel>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panel with the same name replaces the earlier one.
    pub fn subscribe(&mut self, panel: Box<dyn Panel>) {
        self.panels.retain(|p| p.name() != panel.name());
        tracing::debug!("Panel '{}' subscribed", panel.name());
        self.panels.push(panel);
    }

    pub fn unsubscribe(&mut self, name: &str) -> bool {
        let before = self.panels.len();
        self.panels.retain(|p| p.name() != name);
        before != self.panels.len()
    }

    /// Deliver to every subscribed panel, returning how many saw it.
    pub fn broadcast(&mut self, action: &str, data: &Value) -> usize {
        for panel in self.panels.iter_mut() {
            panel.process_update(action, data);
        }
        self.panels.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.panels.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

/// Logs console output and heater readings; what the binary runs headless.
#[derive(Debug, Default)]
pub struct ConsolePanel {
    last_temps: Vec<(String, f64, f64)>,
}

impl ConsolePanel {
    fn log_temperatures(&mut self, data: &Value) {
        let Some(objects) = data.as_object() else { return };
        for (name, fields) in objects {
            let Some(temp) = fields.get("temperature").and_then(Value::as_f64) else { continue };
            let previous = self.last_temps.iter_mut().find(|(n, _, _)| n == name);
            let target = fields
                .get("target")
                .and_then(Value::as_f64)
                .or_else(|| previous.as_ref().map(|(_, _, t)| *t))
                .unwrap_or(0.0);
            match previous {
                Some(entry) => {
                    // Sub-degree jitter is not worth a log line.
                    if (entry.1 - temp).abs() < 1.0 && entry.2 == target {
                        continue;
                    }
                    entry.1 = temp;
                    entry.2 = target;
                }
                None => self.last_temps.push((name.clone(), temp, target)),
            }
            tracing::debug!("{}: {:.1} / {:.1}", name, temp, target);
        }
    }
}

impl Panel for ConsolePanel {
    fn name(&self) -> &str {
        "console"
    }

    fn process_update(&mut self, action: &str, data: &Value) {
        match action {
            "notify_gcode_response" => {
                if let Some(line) = data.as_str() {
                    tracing::info!("// {}", line);
                }
            }
            "notify_status_update" => self.log_temperatures(data),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Panel for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn process_update(&mut self, action: &str, _data: &Value) {
            self.seen.lock().unwrap().push(format!("{}:{}", self.name, action));
        }
    }

    #[test]
    fn test_broadcast_reaches_every_panel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Subscriptions::new();
        subs.subscribe(Box::new(Recorder { name: "a", seen: seen.clone() }));
        subs.subscribe(Box::new(Recorder { name: "b", seen: seen.clone() }));
        assert_eq!(subs.broadcast("notify_klippy_ready", &json!({})), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a:notify_klippy_ready", "b:notify_klippy_ready"]);

        assert!(subs.unsubscribe("a"));
        assert!(!subs.unsubscribe("a"));
        assert_eq!(subs.broadcast("notify_klippy_shutdown", &json!({})), 1);
    }

    #[test]
    fn test_resubscribe_replaces() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Subscriptions::new();
        subs.subscribe(Box::new(Recorder { name: "a", seen: seen.clone() }));
        subs.subscribe(Box::new(Recorder { name: "a", seen }));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.names(), vec!["a"]);
    }
}
