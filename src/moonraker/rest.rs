//! Thin HTTP helper for the handful of Moonraker endpoints used outside the websocket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use thiserror::Error;

use crate::config::PrinterEntry;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Invalid URL {url}")]
    Url { url: String },
    #[error("Request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Invalid response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected response from {url}: missing '{field}'")]
    MissingField { url: String, field: &'static str },
}

impl RestError {
    /// This error followed by every underlying cause, one `Caused by` line each.
    pub fn chain(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            text.push_str("\nCaused by ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }
}

/// Fixed substitutions applied to error text before it is shown to the user.
const STATUS_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("HTTPSConnectionPool", ""),
    ("HTTPConnectionPool", ""),
    ("error sending request for url ", ""),
    ("Caused by ", "\n"),
    (": ", "\n"),
    ("\"", ""),
    ("'", ""),
    ("`", ""),
];

#[derive(Debug, Clone)]
pub struct KlippyRest {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    status: Arc<Mutex<String>>,
}

impl KlippyRest {
    pub fn new(printer: &PrinterEntry, timeout: Duration) -> Result<Self, RestError> {
        let endpoint = printer.http_endpoint();
        let client = Client::builder().build().map_err(|source| RestError::Request {
            url: endpoint.clone(),
            source,
        })?;
        Ok(Self {
            client,
            endpoint,
            api_key: printer.moonraker_api_key.clone().filter(|k| !k.is_empty()),
            timeout,
            status: Arc::new(Mutex::new(String::new())),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Last sanitized failure message, empty when nothing has failed yet.
    pub fn status(&self) -> String {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn set_status(&self, error: &RestError) {
        let text = Self::format_status(&error.chain());
        tracing::error!("{}", text.replace('\n', " "));
        if let Ok(mut status) = self.status.lock() {
            *status = text;
        }
    }

    /// Strip terminal escapes, quoting and library noise from an error message.
    pub fn format_status(raw: &str) -> String {
        let mut text = strip_ansi(raw);
        for (pattern, replacement) in STATUS_SUBSTITUTIONS {
            text = text.replace(pattern, replacement);
        }
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.timeout(self.timeout);
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn execute(&self, url: String, builder: RequestBuilder) -> Result<reqwest::Response, RestError> {
        tracing::debug!("Sending request to {}", url);
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|source| RestError::Request { url: url.clone(), source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status { url, status: status.as_u16() });
        }
        Ok(response)
    }

    /// GET `<endpoint>/<method>` and decode the JSON body.
    pub async fn request(&self, method: &str) -> Result<Value, RestError> {
        let url = self.url(method);
        let response = self.execute(url.clone(), self.client.get(&url)).await?;
        response.json().await.map_err(|source| RestError::Decode { url, source })
    }

    /// POST a JSON body to `<endpoint>/<method>`.
    pub async fn post(&self, method: &str, json: &Value) -> Result<Value, RestError> {
        let url = self.url(method);
        let response = self.execute(url.clone(), self.client.post(&url).json(json)).await?;
        response.json().await.map_err(|source| RestError::Decode { url, source })
    }

    /// Like [`request`](Self::request) but records the failure in `status()`
    /// and returns `None` instead.
    pub async fn send_request(&self, method: &str) -> Option<Value> {
        match self.request(method).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.set_status(&e);
                None
            }
        }
    }

    pub async fn post_request(&self, method: &str, json: &Value) -> Option<Value> {
        match self.post(method, json).await {
            Ok(value) => Some(value),
            Err(e) => {
                self.set_status(&e);
                None
            }
        }
    }

    pub async fn get_server_info(&self) -> Result<Value, RestError> {
        self.request("server/info").await.inspect_err(|e| self.set_status(e))
    }

    pub async fn get_printer_info(&self) -> Option<Value> {
        self.send_request("printer/info").await
    }

    pub async fn get_gcode_help(&self) -> Option<Value> {
        self.send_request("printer/gcode/help").await
    }

    pub async fn get_oneshot_token(&self) -> Result<String, RestError> {
        let url = self.url("access/oneshot_token");
        let response = self.request("access/oneshot_token").await.inspect_err(|e| self.set_status(e))?;
        response
            .get("result")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(RestError::MissingField { url, field: "result" })
            .inspect_err(|e| self.set_status(e))
    }

    /// Raw bytes of a file under the gcodes root, e.g. a thumbnail.
    pub async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        let result = async {
            let url = self.file_url(path)?;
            let text = url.to_string();
            let response = self.execute(text.clone(), self.client.get(url)).await?;
            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|source| RestError::Decode { url: text, source })
        }
        .await;
        match result {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                self.set_status(&e);
                None
            }
        }
    }

    fn file_url(&self, path: &str) -> Result<Url, RestError> {
        let base = self.url("server/files/gcodes");
        let mut url = Url::parse(&base).map_err(|_| RestError::Url { url: base.clone() })?;
        url.path_segments_mut()
            .map_err(|_| RestError::Url { url: base.clone() })?
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

fn strip_ansi(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // CSI sequences end at the first byte in '@'..='~'.
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rest_for(name: &str, port: u16, path: Option<&str>) -> KlippyRest {
        let entry = PrinterEntry {
            name: name.to_string(),
            moonraker_host: "localhost".to_string(),
            moonraker_port: port,
            moonraker_api_key: Some(String::new()),
            moonraker_path: path.map(str::to_string),
        };
        KlippyRest::new(&entry, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_format_status_strips_quotes_and_pool_names() {
        let raw = "HTTPConnectionPool(host='localhost', port=7125): Max retries exceeded \"x\" \u{1b}[31mred\u{1b}[0m";
        let status = KlippyRest::format_status(raw);
        assert!(!status.contains("HTTPConnectionPool"));
        assert!(!status.contains('\''));
        assert!(!status.contains('"'));
        assert!(!status.contains('\u{1b}'));
        assert!(status.contains("red"));
    }

    #[test]
    fn test_format_status_keeps_each_cause_on_its_own_line() {
        let raw = "Request to http://localhost:1/server/info failed\n\
                   Caused by error sending request for url (http://localhost:1/server/info)\n\
                   Caused by client error (Connect)\n\
                   Caused by tcp connect error: Connection refused (os error 111)";
        let status = KlippyRest::format_status(raw);
        let lines: Vec<&str> = status.lines().collect();
        assert_eq!(lines.first(), Some(&"Request to http://localhost:1/server/info failed"));
        assert!(lines.contains(&"Connection refused (os error 111)"));
        assert!(!status.contains("Caused by"));
    }

    #[test]
    fn test_status_without_source_is_single_line() {
        let error = RestError::Status { url: "http://localhost/x".to_string(), status: 404 };
        assert_eq!(error.chain(), "http://localhost/x returned HTTP 404");
    }

    #[test]
    fn test_empty_api_key_is_ignored() {
        let rest = rest_for("p", 7125, None);
        assert!(rest.api_key.is_none());
        assert_eq!(rest.endpoint(), "http://localhost:7125");
    }

    #[test]
    fn test_file_url_encodes_segments() {
        let rest = rest_for("p", 7125, Some("moonraker"));
        let url = rest.file_url("sub dir/my part#1.gcode").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:7125/moonraker/server/files/gcodes/sub%20dir/my%20part%231.gcode"
        );
    }
}
