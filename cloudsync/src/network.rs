use std::time::{Duration, Instant};

const OFFLINE_WARNING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityNotice {
    /// The network went down; tell the user once.
    OfflineWarning,
}

/// Debounces connectivity notifications so a flapping network does not spam the user.
#[derive(Debug, Clone)]
pub struct ConnectivityAlerts {
    connected: bool,
    last_warning: Option<Instant>,
    connection_error_shown: bool,
    interval: Duration,
}

impl ConnectivityAlerts {
    pub fn new() -> Self {
        Self::with_interval(OFFLINE_WARNING_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            connected: true,
            last_warning: None,
            connection_error_shown: false,
            interval,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<ConnectivityNotice> {
        self.set_connected_at(connected, Instant::now())
    }

    pub fn set_connected_at(
        &mut self,
        connected: bool,
        now: Instant,
    ) -> Option<ConnectivityNotice> {
        let was_connected = self.connected;
        self.connected = connected;
        if connected {
            self.connection_error_shown = false;
            return None;
        }
        if !was_connected {
            return None;
        }
        let recently_warned = self
            .last_warning
            .is_some_and(|last| now.saturating_duration_since(last) < self.interval);
        if recently_warned {
            return None;
        }
        self.last_warning = Some(now);
        Some(ConnectivityNotice::OfflineWarning)
    }

    /// True the first time an operation fails for lack of connectivity, until reconnect.
    pub fn report_connection_error(&mut self) -> bool {
        !std::mem::replace(&mut self.connection_error_shown, true)
    }
}

impl Default for ConnectivityAlerts {
    fn default() -> Self {
        Self::new()
    }
}
