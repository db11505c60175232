//! Connection identity generation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Server-assigned identity of one live socket.
///
/// Never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", base36_encode(self.get()))
    }
}

/// Hands out monotonically increasing connection ids.
pub struct ConnIdGenerator {
    counter: AtomicU64,
}

impl ConnIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> ConnId {
        ConnId(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a number in base36, zero-padded to at least 6 characters.
fn base36_encode(mut n: u64) -> String {
    const CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const MIN_WIDTH: usize = 6;
    // u64::MAX needs 13 digits.
    let mut digits = [b'0'; 13];
    let mut start = digits.len();

    while n > 0 {
        start -= 1;
        digits[start] = CHARS[(n % 36) as usize];
        n /= 36;
    }
    start = start.min(digits.len() - MIN_WIDTH);

    String::from_utf8_lossy(&digits[start..]).into_owned()
}
