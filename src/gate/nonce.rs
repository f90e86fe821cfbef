//! Cache-busting path segment for static resources.

use std::time::{SystemTime, UNIX_EPOCH};

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Fixed for the lifetime of the process so a restart invalidates cached
/// resources.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceCacheNonce {
    value: String,
    enabled: bool,
}

impl ResourceCacheNonce {
    /// Derive the nonce from the current time.
    #[must_use]
    pub fn from_startup(enabled: bool) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        Self::new(millis, enabled)
    }

    #[must_use]
    pub fn new(startup_millis: u128, enabled: bool) -> Self {
        Self {
            value: radix36(startup_millis),
            enabled,
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// `/nonce-<value>`, or an empty string when disabled.
    #[must_use]
    pub fn prefix(&self) -> String {
        if self.enabled {
            format!("/nonce-{}", self.value)
        } else {
            String::new()
        }
    }
}

fn radix36(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        // value % 36 always indexes DIGITS
        digits.push(char::from(DIGITS[(value % 36) as usize]));
        value /= 36;
    }
    digits.iter().rev().collect()
}
