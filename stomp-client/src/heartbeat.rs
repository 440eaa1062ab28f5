use stomp_proto::{negotiate, HeartBeat, Negotiated, ProtocolError, Result};
use std::time::Duration;
use tracing::debug;

/// Upper bound on how long the receive loop waits per iteration
pub const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// What the receive loop should do after advancing the timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    Idle,
    /// The tx countdown ran out: send a keep-alive
    Send,
}

/// Countdown timers for both heartbeat directions.
///
/// Timers are cooperative: the receive loop advances them by the time that
/// elapsed since its previous iteration.
#[derive(Debug)]
pub struct HeartbeatTimers {
    declared_ms: u64,
    negotiated: Option<Negotiated>,
    rx_remaining_us: i64,
    tx_remaining_us: i64,
}

impl HeartbeatTimers {
    pub fn new(declared_ms: u64) -> Self {
        Self {
            declared_ms,
            negotiated: None,
            rx_remaining_us: 0,
            tx_remaining_us: 0,
        }
    }

    pub fn declared_ms(&self) -> u64 {
        self.declared_ms
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated
    }

    /// Applies the server's `heart-beat` header and starts both countdowns
    pub fn negotiate(&mut self, peer: HeartBeat) -> Negotiated {
        let negotiated = negotiate(self.declared_ms, peer);
        self.negotiated = Some(negotiated);
        self.received();
        self.transmitted();
        debug!(
            "Heartbeats negotiated: rx every {} ms, tx every {} ms",
            negotiated.rx_ms, negotiated.tx_ms
        );
        negotiated
    }

    pub fn is_active(&self) -> bool {
        self.declared_ms > 0
            && self
                .negotiated
                .map_or(false, |n| n.rx_ms > 0 || n.tx_ms > 0)
    }

    /// How long the loop may wait before the timers need attention
    pub fn poll_interval(&self) -> Duration {
        if self.tx_ms() > 0 && self.is_active() {
            let remaining = self.tx_remaining_us.max(1000) as u64;
            Duration::from_micros(remaining).min(POLL_INTERVAL)
        } else {
            POLL_INTERVAL
        }
    }

    /// Counts both timers down by `elapsed`.
    ///
    /// Fails with `HeartbeatTimeout` once nothing has been received for the
    /// rx interval plus 50% grace.
    pub fn advance(&mut self, elapsed: Duration) -> Result<HeartbeatAction> {
        if !self.is_active() {
            return Ok(HeartbeatAction::Idle);
        }

        let elapsed_us = i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX);

        if self.rx_ms() > 0 {
            self.rx_remaining_us = self.rx_remaining_us.saturating_sub(elapsed_us);
            if self.rx_remaining_us < 0 {
                return Err(ProtocolError::HeartbeatTimeout(self.rx_grace_ms()));
            }
        }

        if self.tx_ms() > 0 {
            self.tx_remaining_us = self.tx_remaining_us.saturating_sub(elapsed_us);
            if self.tx_remaining_us < 0 {
                return Ok(HeartbeatAction::Send);
            }
        }

        Ok(HeartbeatAction::Idle)
    }

    /// Data arrived from the server
    pub fn received(&mut self) {
        self.rx_remaining_us = millis_to_micros(self.rx_grace_ms());
    }

    /// Something was written to the server
    pub fn transmitted(&mut self) {
        self.tx_remaining_us = millis_to_micros(self.tx_ms());
    }

    fn rx_ms(&self) -> u64 {
        self.negotiated.map_or(0, |n| n.rx_ms)
    }

    fn tx_ms(&self) -> u64 {
        self.negotiated.map_or(0, |n| n.tx_ms)
    }

    fn rx_grace_ms(&self) -> u64 {
        self.rx_ms().saturating_mul(3) / 2
    }
}

/// Intervals come from the server, so clamp instead of overflowing
fn millis_to_micros(ms: u64) -> i64 {
    i64::try_from(ms.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_inactive_until_negotiated() {
        let mut timers = HeartbeatTimers::new(1000);
        assert!(!timers.is_active());
        assert_eq!(timers.poll_interval(), POLL_INTERVAL);
        assert_eq!(timers.advance(ms(60_000)).unwrap(), HeartbeatAction::Idle);
    }

    #[test]
    fn test_disabled_locally() {
        let mut timers = HeartbeatTimers::new(0);
        timers.negotiate(HeartBeat::symmetric(1000));
        assert!(!timers.is_active());
        assert_eq!(timers.advance(ms(60_000)).unwrap(), HeartbeatAction::Idle);
    }

    #[test]
    fn test_negotiation_rule() {
        let mut timers = HeartbeatTimers::new(5000);
        let negotiated = timers.negotiate("2000,3000".parse().unwrap());
        assert_eq!(negotiated, Negotiated { rx_ms: 5000, tx_ms: 5000 });
    }

    #[test]
    fn test_tx_countdown_requests_heartbeat() {
        let mut timers = HeartbeatTimers::new(100);
        timers.negotiate("0,100".parse().unwrap());

        assert_eq!(timers.advance(ms(60)).unwrap(), HeartbeatAction::Idle);
        assert_eq!(timers.poll_interval(), POLL_INTERVAL);
        assert_eq!(timers.advance(ms(35)).unwrap(), HeartbeatAction::Idle);
        assert_eq!(timers.poll_interval(), ms(5));
        assert_eq!(timers.advance(ms(10)).unwrap(), HeartbeatAction::Send);

        timers.transmitted();
        assert_eq!(timers.advance(ms(50)).unwrap(), HeartbeatAction::Idle);
    }

    #[test]
    fn test_huge_peer_interval_saturates() {
        let mut timers = HeartbeatTimers::new(1000);
        let negotiated = timers.negotiate("18446744073709551615,0".parse().unwrap());

        assert_eq!(negotiated.rx_ms, u64::MAX);
        assert!(timers.is_active());
        assert_eq!(timers.poll_interval(), POLL_INTERVAL);
        assert_eq!(timers.advance(ms(60_000)).unwrap(), HeartbeatAction::Idle);

        timers.received();
        assert_eq!(timers.advance(Duration::MAX).unwrap(), HeartbeatAction::Idle);
    }

    #[test]
    fn test_huge_tx_interval_saturates() {
        let mut timers = HeartbeatTimers::new(1000);
        timers.negotiate("0,18446744073709551615".parse().unwrap());

        assert_eq!(timers.poll_interval(), POLL_INTERVAL);
        assert_eq!(timers.advance(ms(60_000)).unwrap(), HeartbeatAction::Idle);
    }

    #[test]
    fn test_rx_timeout_has_grace() {
        let mut timers = HeartbeatTimers::new(100);
        timers.negotiate("100,0".parse().unwrap());

        assert_eq!(timers.advance(ms(140)).unwrap(), HeartbeatAction::Idle);
        timers.received();
        assert_eq!(timers.advance(ms(149)).unwrap(), HeartbeatAction::Idle);

        assert!(matches!(
            timers.advance(ms(2)),
            Err(ProtocolError::HeartbeatTimeout(150))
        ));
    }
}
