// src/printer/temperature.rs - Fixed-length temperature history per device
use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

pub const DEFAULT_STORE_SIZE: usize = 1200;

/// One of the three histories Moonraker keeps per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Series {
    Temperatures,
    Targets,
    Powers,
}

impl Series {
    pub const ALL: [Series; 3] = [Series::Temperatures, Series::Targets, Series::Powers];

    /// Key used by `server.temperature_store`.
    pub fn store_key(&self) -> &'static str {
        match self {
            Series::Temperatures => "temperatures",
            Series::Targets => "targets",
            Series::Powers => "powers",
        }
    }

    /// Field of the live Klipper object the series samples.
    pub fn field(&self) -> &'static str {
        match self {
            Series::Temperatures => "temperature",
            Series::Targets => "target",
            Series::Powers => "power",
        }
    }

    pub fn from_store_key(key: &str) -> Option<Self> {
        Series::ALL.into_iter().find(|s| s.store_key() == key)
    }
}

/// Every series holds exactly `size` samples once created.
#[derive(Debug, Clone)]
pub struct TempStore {
    size: usize,
    devices: BTreeMap<String, BTreeMap<Series, VecDeque<f64>>>,
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_SIZE)
    }
}

impl TempStore {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            devices: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn get(&self, device: &str, series: Series) -> Option<&VecDeque<f64>> {
        self.devices.get(device)?.get(&series)
    }

    /// Zero-filled history for a device that Moonraker has no store for.
    pub fn add_device(&mut self, device: &str, series: &[Series]) {
        let size = self.size;
        let entry = self.devices.entry(device.to_string()).or_default();
        for s in series {
            entry.entry(*s).or_insert_with(|| VecDeque::from(vec![0.0; size]));
        }
    }

    /// Load a `server.temperature_store` result. Short histories are padded
    /// at the front with zeros, long ones lose their oldest samples.
    pub fn load(&mut self, result: &Value) {
        let Some(devices) = result.as_object() else {
            tracing::warn!("Temperature store result is not an object");
            return;
        };
        for (device, stores) in devices {
            let Some(stores) = stores.as_object() else { continue };
            let entry = self.devices.entry(device.clone()).or_default();
            for (key, samples) in stores {
                let Some(series) = Series::from_store_key(key) else { continue };
                let samples: Vec<f64> = samples
                    .as_array()
                    .map(|a| a.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect())
                    .unwrap_or_default();
                let mut history: VecDeque<f64> = samples.into_iter().rev().take(self.size).collect();
                history.resize(self.size, 0.0);
                // Built newest-first above; flip back to oldest-first.
                history.make_contiguous().reverse();
                entry.insert(series, history);
            }
        }
        tracing::debug!("Temperature store loaded for {} devices", self.devices.len());
    }

    /// Append one sample to every series, taking the value from `lookup`
    /// (device, field) and recording 0 when it has none.
    pub fn sample<F>(&mut self, lookup: F)
    where
        F: Fn(&str, &str) -> Option<f64>,
    {
        for (device, stores) in self.devices.iter_mut() {
            for (series, history) in stores.iter_mut() {
                let value = lookup(device, series.field()).unwrap_or(0.0);
                history.pop_front();
                history.push_back(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_pads_and_truncates() {
        let mut store = TempStore::new(4);
        store.load(&json!({
            "extruder": {"temperatures": [1.0, 2.0], "targets": [0, 0, 0, 200, 210, 220]},
        }));
        let temps: Vec<f64> = store.get("extruder", Series::Temperatures).unwrap().iter().copied().collect();
        assert_eq!(temps, vec![0.0, 0.0, 1.0, 2.0]);
        let targets: Vec<f64> = store.get("extruder", Series::Targets).unwrap().iter().copied().collect();
        assert_eq!(targets, vec![0.0, 200.0, 210.0, 220.0]);
        assert!(store.get("extruder", Series::Powers).is_none());
    }

    #[test]
    fn test_sample_keeps_length() {
        let mut store = TempStore::new(3);
        store.add_device("heater_bed", &[Series::Temperatures, Series::Targets]);
        store.sample(|device, field| match (device, field) {
            ("heater_bed", "temperature") => Some(60.5),
            _ => None,
        });
        let temps: Vec<f64> = store.get("heater_bed", Series::Temperatures).unwrap().iter().copied().collect();
        assert_eq!(temps, vec![0.0, 0.0, 60.5]);
        let targets = store.get("heater_bed", Series::Targets).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets.back(), Some(&0.0));
    }
}
