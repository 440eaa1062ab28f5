use crate::{ProtocolError, Result};
use std::fmt;
use std::str::FromStr;

/// Value of a `heart-beat` header: `<can-send-ms>,<want-receive-ms>`.
///
/// Zero in either position means the sender will not send, or does not
/// want to receive, heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl HeartBeat {
    /// The header a client sends when it declares the same interval in both
    /// directions
    pub fn symmetric(interval_ms: u64) -> Self {
        Self {
            send_ms: interval_ms,
            receive_ms: interval_ms,
        }
    }
}

impl FromStr for HeartBeat {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self> {
        let (send, receive) = value
            .split_once(',')
            .ok_or_else(|| ProtocolError::malformed("heart-beat", "expected two values"))?;

        let parse = |part: &str| {
            part.trim().parse::<u64>().map_err(|_| {
                ProtocolError::malformed("heart-beat", format!("not an interval: {:?}", part))
            })
        };

        Ok(Self {
            send_ms: parse(send)?,
            receive_ms: parse(receive)?,
        })
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

/// Effective heartbeat periods after negotiation; zero disables a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    pub rx_ms: u64,
    pub tx_ms: u64,
}

/// Combines the locally declared interval with the peer's header.
///
/// Each direction runs at the slower of what one side offers and what the
/// other asks for, and is disabled if either side declared zero.
pub fn negotiate(local_ms: u64, peer: HeartBeat) -> Negotiated {
    let combine = |peer_ms: u64| {
        if local_ms == 0 || peer_ms == 0 {
            0
        } else {
            local_ms.max(peer_ms)
        }
    };

    Negotiated {
        rx_ms: combine(peer.send_ms),
        tx_ms: combine(peer.receive_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let hb: HeartBeat = "2000,3000".parse().unwrap();
        assert_eq!(hb, HeartBeat { send_ms: 2000, receive_ms: 3000 });

        let hb: HeartBeat = "10, 20".parse().unwrap();
        assert_eq!(hb.receive_ms, 20);

        assert!("2000".parse::<HeartBeat>().is_err());
        assert!("a,b".parse::<HeartBeat>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(HeartBeat::symmetric(5000).to_string(), "5000,5000");
    }

    #[test]
    fn test_negotiate_takes_slower_rate() {
        let negotiated = negotiate(5000, "2000,3000".parse().unwrap());
        assert_eq!(negotiated, Negotiated { rx_ms: 5000, tx_ms: 5000 });

        let negotiated = negotiate(1000, "2000,3000".parse().unwrap());
        assert_eq!(negotiated, Negotiated { rx_ms: 2000, tx_ms: 3000 });
    }

    #[test]
    fn test_negotiate_zero_disables() {
        assert_eq!(negotiate(0, HeartBeat::symmetric(1000)), Negotiated::default());

        let negotiated = negotiate(1000, "0,4000".parse().unwrap());
        assert_eq!(negotiated, Negotiated { rx_ms: 0, tx_ms: 4000 });
    }
}
