//! Counters kept by the transport bridge.

use std::fmt;
use std::time::Duration;

/// Traffic and processing counters for one bridge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Datagrams read from the socket
    pub datagrams_in: u64,
    /// Bytes read from the socket
    pub bytes_in: u64,
    /// Datagrams written to the socket
    pub datagrams_out: u64,
    /// Bytes written to the socket
    pub bytes_out: u64,
    /// Sends that failed outright
    pub send_failures: u64,
    /// Sends refused for lack of buffer space
    pub sends_deferred: u64,
    /// Inbound plaintext that did not decode
    pub malformed: u64,
    /// Requests run through the dispatcher
    pub dispatched: u64,
    /// Responses dropped because they did not fit the response buffer
    pub responses_dropped: u64,
    /// Responses seen in client role
    pub responses_observed: u64,
    /// Engine rejections of inbound datagrams
    pub rejected: u64,
    /// Handshakes completed
    pub handshakes_completed: u64,
    /// Handshakes failed
    pub handshakes_failed: u64,
    /// Processing time of the most recent inbound datagram
    pub last_inbound: Duration,
    /// Longest inbound processing time seen
    pub max_inbound: Duration,
}

impl BridgeStats {
    /// Account for one received datagram and the time spent on it
    pub fn record_inbound(&mut self, len: usize, elapsed: Duration) {
        self.datagrams_in += 1;
        self.bytes_in += len as u64;
        self.last_inbound = elapsed;
        self.max_inbound = self.max_inbound.max(elapsed);
    }

    /// Account for one send attempt's result
    pub fn record_outbound(&mut self, sent: usize) {
        self.datagrams_out += 1;
        self.bytes_out += sent as u64;
    }
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in={}/{}B out={}/{}B send_fail={} deferred={} malformed={} dispatched={} dropped={} observed={} rejected={} handshakes={}/{} max_inbound={:?}",
            self.datagrams_in,
            self.bytes_in,
            self.datagrams_out,
            self.bytes_out,
            self.send_failures,
            self.sends_deferred,
            self.malformed,
            self.dispatched,
            self.responses_dropped,
            self.responses_observed,
            self.rejected,
            self.handshakes_completed,
            self.handshakes_failed,
            self.max_inbound,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_timing() {
        let mut stats = BridgeStats::default();
        stats.record_inbound(10, Duration::from_micros(50));
        stats.record_inbound(20, Duration::from_micros(20));
        assert_eq!(stats.datagrams_in, 2);
        assert_eq!(stats.bytes_in, 30);
        assert_eq!(stats.last_inbound, Duration::from_micros(20));
        assert_eq!(stats.max_inbound, Duration::from_micros(50));
    }

    #[test]
    fn test_display() {
        let mut stats = BridgeStats::default();
        stats.record_outbound(42);
        let line = stats.to_string();
        assert!(line.starts_with("in=0/0B out=1/42B"));
    }
}
