//! Utility functions and helpers

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod enum_macros;

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Controller state is only mutated through short critical sections that leave
/// it consistent at every await-free step, so a poisoned lock still guards
/// usable data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render a frame as a hex dump for log output, 16 bytes per line
pub fn hex_dump(data: &[u8], prefix: &str) -> String {
    data.chunks(16)
        .enumerate()
        .map(|(i, chunk)| format!("{}{:04X}: {}", prefix, i * 16, hex::encode_upper(chunk)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a 64-bit EUI (entity id, stream id) the way AVDECC tools print them
pub fn format_eui64(value: u64) -> String {
    format!("0x{:016x}", value)
}

/// Parse an EUI-64 from `0x`-prefixed hex, bare hex, or colon/dash separated
/// octets (`00:1b:92:ff:fe:01:02:03`).
pub fn parse_eui64(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.contains(':') || text.contains('-') {
        let octets: Vec<&str> = text.split([':', '-']).collect();
        if octets.len() != 8 {
            return None;
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(octets.concat(), &mut bytes).ok()?;
        return Some(u64::from_be_bytes(bytes));
    }
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Traffic counters kept by the controller
pub mod statistics {
    /// AVDECC communication statistics
    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct CommunicationStats {
        pub frames_sent: u64,
        pub frames_received: u64,
        pub bytes_sent: u64,
        pub bytes_received: u64,
        /// Frames dropped because they failed to decode
        pub malformed_frames: u64,
        pub transmit_errors: u64,
        pub timeouts: u64,
        pub retries: u64,
        pub responses_matched: u64,
        pub unmatched_responses: u64,
        pub protocol_failures: u64,
    }

    impl CommunicationStats {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record_sent(&mut self, bytes: usize) {
            self.frames_sent += 1;
            self.bytes_sent += bytes as u64;
        }

        pub fn record_received(&mut self, bytes: usize) {
            self.frames_received += 1;
            self.bytes_received += bytes as u64;
        }

        pub fn record_malformed(&mut self) {
            self.malformed_frames += 1;
        }

        pub fn record_transmit_error(&mut self) {
            self.transmit_errors += 1;
        }

        pub fn record_timeout(&mut self) {
            self.timeouts += 1;
        }

        pub fn record_retry(&mut self) {
            self.retries += 1;
        }

        pub fn record_response(&mut self, success: bool) {
            self.responses_matched += 1;
            if !success {
                self.protocol_failures += 1;
            }
        }

        pub fn record_unmatched(&mut self) {
            self.unmatched_responses += 1;
        }

        /// Percentage of resolved commands that succeeded
        pub fn success_rate(&self) -> f64 {
            let resolved = (self.responses_matched + self.timeouts) as f64;
            if resolved == 0.0 {
                return 100.0;
            }
            let failures = (self.protocol_failures + self.timeouts) as f64;
            ((resolved - failures) / resolved) * 100.0
        }

        pub fn reset(&mut self) {
            *self = Self::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::statistics::CommunicationStats;
    use super::*;

    #[test]
    fn test_hex_dump() {
        let data: Vec<u8> = (0u8..20).collect();
        let dump = hex_dump(&data, "  ");
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "  0000: 000102030405060708090A0B0C0D0E0F");
        assert_eq!(lines[1], "  0010: 10111213");
    }

    #[test]
    fn test_parse_eui64() {
        assert_eq!(parse_eui64("0x001b92fffe010203"), Some(0x001b_92ff_fe01_0203));
        assert_eq!(parse_eui64("001B92FFFE010203"), Some(0x001b_92ff_fe01_0203));
        assert_eq!(
            parse_eui64("00:1b:92:ff:fe:01:02:03"),
            Some(0x001b_92ff_fe01_0203)
        );
        assert_eq!(parse_eui64("00-1b-92-ff-fe-01-02-03"), Some(0x001b_92ff_fe01_0203));
        assert_eq!(parse_eui64("00:1b:92"), None);
        assert_eq!(parse_eui64("0x"), None);
        assert_eq!(parse_eui64("0x1234567890abcdef0"), None);
        assert_eq!(format_eui64(0x001b_92ff_fe01_0203), "0x001b92fffe010203");
    }

    #[test]
    fn test_statistics() {
        let mut stats = CommunicationStats::new();
        assert_eq!(stats.success_rate(), 100.0);

        stats.record_sent(68);
        stats.record_sent(68);
        stats.record_response(true);
        stats.record_timeout();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 136);
        assert_eq!(stats.success_rate(), 50.0);

        stats.reset();
        assert_eq!(stats, CommunicationStats::default());
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        use std::sync::Arc;

        let shared = Arc::new(Mutex::new(1));
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(shared.is_poisoned());
        assert_eq!(*lock(&shared), 1);
    }
}
