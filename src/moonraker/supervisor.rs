//! Connection lifecycle bookkeeping, kept free of I/O so it can be driven
//! from the event loop and tested on its own.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    /// Retries exhausted. Only `retry()` leaves this state.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAttempt {
    AlreadyConnected,
    Proceed { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Already connected: stop the retry timer.
    Cancel,
    /// Retries exhausted: stop the timer and report the failure.
    GiveUp,
    /// Try again and keep the timer running.
    Attempt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The close was requested; do not reconnect.
    Shutdown,
    /// The socket dropped on its own.
    Lost,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    state: ConnectionState,
    reconnect_count: u32,
    max_retries: u32,
}

impl Supervisor {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_count: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn begin_connect(&mut self) -> ConnectAttempt {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => ConnectAttempt::AlreadyConnected,
            _ => {
                self.reconnect_count += 1;
                self.state = ConnectionState::Connecting;
                ConnectAttempt::Proceed { attempt: self.reconnect_count }
            }
        }
    }

    /// The REST pre-flight failed. Returns true once the failure is worth
    /// showing, which is from the second consecutive attempt on.
    pub fn rest_failed(&mut self) -> bool {
        self.fall_back();
        self.reconnect_count > 1
    }

    pub fn handshake_failed(&mut self) {
        self.fall_back();
    }

    pub fn opened(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_count = 0;
    }

    pub fn closed(&mut self) -> CloseOutcome {
        let outcome = if self.state == ConnectionState::Closing {
            CloseOutcome::Shutdown
        } else {
            CloseOutcome::Lost
        };
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
        outcome
    }

    pub fn reconnect(&mut self) -> ReconnectDecision {
        match self.state {
            ConnectionState::Connected => ReconnectDecision::Cancel,
            ConnectionState::Failed => ReconnectDecision::GiveUp,
            _ if self.reconnect_count > self.max_retries => {
                self.state = ConnectionState::Failed;
                ReconnectDecision::GiveUp
            }
            _ => ReconnectDecision::Attempt,
        }
    }

    pub fn retry(&mut self) {
        self.reconnect_count = 0;
        if matches!(self.state, ConnectionState::Failed | ConnectionState::Closing) {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Returns true when a live or pending socket has to be torn down.
    pub fn close(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                self.state = ConnectionState::Closing;
                true
            }
            _ => false,
        }
    }

    fn fall_back(&mut self) {
        // A close requested mid-attempt wins over the attempt's failure.
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_attempt(supervisor: &mut Supervisor) -> bool {
        assert!(matches!(supervisor.begin_connect(), ConnectAttempt::Proceed { .. }));
        supervisor.rest_failed()
    }

    #[test]
    fn test_connect_is_noop_when_connected() {
        let mut supervisor = Supervisor::new(4);
        assert_eq!(supervisor.begin_connect(), ConnectAttempt::Proceed { attempt: 1 });
        assert_eq!(supervisor.begin_connect(), ConnectAttempt::AlreadyConnected);
        supervisor.opened();
        assert_eq!(supervisor.reconnect_count(), 0);
        assert_eq!(supervisor.begin_connect(), ConnectAttempt::AlreadyConnected);
        assert_eq!(supervisor.reconnect(), ReconnectDecision::Cancel);
    }

    #[test]
    fn test_status_reported_from_second_failure() {
        let mut supervisor = Supervisor::new(4);
        assert!(!fail_attempt(&mut supervisor));
        assert!(fail_attempt(&mut supervisor));
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_gives_up_after_max_retries_until_retry() {
        let mut supervisor = Supervisor::new(4);
        fail_attempt(&mut supervisor);
        let mut attempts = 1;
        while supervisor.reconnect() == ReconnectDecision::Attempt {
            fail_attempt(&mut supervisor);
            attempts += 1;
        }
        assert_eq!(attempts, 5);
        assert_eq!(supervisor.state(), ConnectionState::Failed);
        for _ in 0..3 {
            assert_eq!(supervisor.reconnect(), ReconnectDecision::GiveUp);
        }

        supervisor.retry();
        assert_eq!(supervisor.reconnect_count(), 0);
        assert_eq!(supervisor.reconnect(), ReconnectDecision::Attempt);
    }

    #[test]
    fn test_requested_close_suppresses_reconnect() {
        let mut supervisor = Supervisor::new(4);
        supervisor.begin_connect();
        supervisor.opened();
        assert!(supervisor.close());
        assert_eq!(supervisor.state(), ConnectionState::Closing);
        assert_eq!(supervisor.closed(), CloseOutcome::Shutdown);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        supervisor.begin_connect();
        supervisor.opened();
        assert_eq!(supervisor.closed(), CloseOutcome::Lost);
    }
}
