//! Integration tests for request correlation and the retry policy

use krusty_screen::config::{ConnectionConfig, PrinterEntry};
use krusty_screen::moonraker::supervisor::{CloseOutcome, ConnectAttempt, ReconnectDecision};
use krusty_screen::moonraker::{
    ConnectionNotice, ConnectionState, CorrelatorError, KlippyWebsocket, RequestCorrelator, RpcReply, Supervisor,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[test]
fn test_ids_are_unique_and_increasing() {
    let mut correlator = RequestCorrelator::new();
    let ids: Vec<u64> = (0..50)
        .map(|_| correlator.register("server.info", &json!({}), None))
        .collect();
    assert!(ids.windows(2).all(|w| w[1] > w[0]));
    assert_eq!(correlator.last_id(), 50);
    // Fire-and-forget requests never occupy the table.
    assert_eq!(correlator.pending_len(), 0);
}

#[test]
fn test_callback_runs_exactly_once() {
    let replies: Arc<Mutex<Vec<RpcReply>>> = Arc::new(Mutex::new(Vec::new()));
    let mut correlator = RequestCorrelator::new();
    let sink = replies.clone();
    let id = correlator.register(
        "printer.gcode.script",
        &json!({"script": "G28"}),
        Some(Box::new(move |reply| sink.lock().unwrap().push(reply))),
    );

    correlator
        .resolve(id, json!({"jsonrpc": "2.0", "result": "ok", "id": id}))
        .unwrap();
    assert_eq!(
        correlator.resolve(id, json!({"result": "ok", "id": id})),
        Err(CorrelatorError::UnknownCall(id))
    );

    let replies = replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].method, "printer.gcode.script");
    assert_eq!(replies[0].params, json!({"script": "G28"}));
    assert_eq!(replies[0].result(), Some(&json!("ok")));
}

#[test]
fn test_abandoned_calls_never_run() {
    let ran = Arc::new(Mutex::new(false));
    let mut correlator = RequestCorrelator::new();
    let flag = ran.clone();
    let id = correlator.register("printer.info", &json!({}), Some(Box::new(move |_| *flag.lock().unwrap() = true)));
    assert_eq!(correlator.abandon_all(), 1);
    assert!(correlator.resolve(id, json!({"result": {}})).is_err());
    assert!(!*ran.lock().unwrap());
    // Ids keep counting after the table is dropped.
    assert_eq!(correlator.register("printer.info", &json!({}), None), id + 1);
}

#[test]
fn test_retry_budget_is_bounded() {
    let mut supervisor = Supervisor::new(4);
    assert!(matches!(supervisor.begin_connect(), ConnectAttempt::Proceed { attempt: 1 }));
    supervisor.rest_failed();

    let mut attempts = 1;
    loop {
        match supervisor.reconnect() {
            ReconnectDecision::Attempt => {
                attempts += 1;
                supervisor.rest_failed();
            }
            ReconnectDecision::GiveUp => break,
            ReconnectDecision::Cancel => panic!("not connected, should not cancel"),
        }
    }
    assert_eq!(attempts, 5);
    assert_eq!(supervisor.state(), ConnectionState::Failed);

    supervisor.retry();
    assert_eq!(supervisor.reconnect_count(), 0);
    assert!(matches!(supervisor.begin_connect(), ConnectAttempt::Proceed { attempt: 1 }));
}

#[test]
fn test_success_resets_retry_count() {
    let mut supervisor = Supervisor::new(4);
    supervisor.begin_connect();
    supervisor.rest_failed();
    assert_eq!(supervisor.reconnect(), ReconnectDecision::Attempt);
    supervisor.opened();
    assert_eq!(supervisor.reconnect_count(), 0);
    assert!(supervisor.is_connected());
    assert_eq!(supervisor.reconnect(), ReconnectDecision::Cancel);
    assert!(matches!(supervisor.begin_connect(), ConnectAttempt::AlreadyConnected));

    assert_eq!(supervisor.closed(), CloseOutcome::Lost);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
}

#[test]
fn test_requested_close_is_not_a_loss() {
    let mut supervisor = Supervisor::new(4);
    supervisor.begin_connect();
    supervisor.opened();
    assert!(supervisor.close());
    assert_eq!(supervisor.closed(), CloseOutcome::Shutdown);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_client_gives_up_then_retries_on_request() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = PrinterEntry { moonraker_port: 1, ..PrinterEntry::default() };
    let connection = ConnectionConfig {
        max_retries: 2,
        retry_interval_secs: 1,
        rest_timeout_ms: 500,
        ..ConnectionConfig::default()
    };
    let mut client = KlippyWebsocket::new(printer, connection, tx).unwrap();
    client.initial_connect();

    let mut statuses = Vec::new();
    let failed = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let event = rx.recv().await.unwrap();
            match client.handle_event(event) {
                Some(ConnectionNotice::Status(text)) => statuses.push(text),
                Some(ConnectionNotice::Failed(text)) => break text,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    // The first refused attempt is silent; every retry after it is reported.
    assert_eq!(statuses.len(), 2, "{:?}", statuses);
    assert!(statuses[0].ends_with("Retrying #2"));
    assert!(statuses[1].ends_with("Retrying #3"));
    assert!(failed.starts_with("Cannot connect to Moonraker"));
    assert!(failed.contains("Connection refused"), "{}", failed);
    assert_eq!(client.state(), ConnectionState::Failed);

    // Further ticks keep giving up and the timer is stopped.
    assert!(!client.reconnect());
    assert!(!client.reconnect());
    assert!(tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await.is_err());
    assert_eq!(client.state(), ConnectionState::Failed);

    client.retry();
    assert_eq!(client.reconnect_count(), 1);
    assert_eq!(client.state(), ConnectionState::Connecting);
    client.close();
}
