use std::time::Duration;

pub use exponential_backoff::Backoff;

/// Reconnect backoff schedule for the websocket transport: an error
/// count driving an `exponential_backoff::Backoff`, reset on every
/// successful connection.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    error_count: u32,
    backoff: Backoff,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self {
            error_count: 0,
            backoff: Backoff::new(u32::MAX, Duration::from_millis(250), Some(Duration::from_secs(30))),
        }
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        self.error_count += 1;
        self.backoff
            .next(self.error_count)
            .unwrap_or(Duration::from_secs(30))
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_until_capped() {
        let mut backoff = ReconnectBackoff::new();
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert!(second >= first);
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut backoff = ReconnectBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        let after_reset = backoff.next_delay();
        let mut fresh = ReconnectBackoff::new();
        assert_eq!(after_reset, fresh.next_delay());
    }
}
