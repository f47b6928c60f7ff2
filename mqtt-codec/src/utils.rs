// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::DecodeError;

/// Generate a random alphanumeric string, handy for auto-assigned client ids.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// MQTT 3.1.1 §3.1.3.5 requires the broker accept client ids of 1-23 bytes
/// made of the 62 allowed characters; a client is free to send more and rely
/// on the broker, but we refuse obviously-wrong input client-side: empty, or
/// longer than the 23 bytes every compliant broker is guaranteed to accept.
///
/// # Errors
/// Returns [`DecodeError::InvalidClientId`] if `client_id` is empty or longer
/// than 23 bytes.
pub fn check_client_id(client_id: &str) -> Result<(), DecodeError> {
    if client_id.is_empty() || client_id.len() > 23 {
        return Err(DecodeError::InvalidClientId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_len() {
        assert_eq!(random_string(12).len(), 12);
    }

    #[test]
    fn test_check_client_id() {
        assert!(check_client_id("").is_err());
        assert!(check_client_id("c1").is_ok());
        assert!(check_client_id(&"x".repeat(24)).is_err());
        assert!(check_client_id(&"x".repeat(23)).is_ok());
    }
}
