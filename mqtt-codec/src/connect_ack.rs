// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// If the server sends a `ConnectAck` with a non-zero return code, it MUST
/// close the network connection [MQTT-3.2.2-5].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    #[must_use]
    pub const fn is_auth_failure(self) -> bool {
        matches!(
            self,
            ConnectReturnCode::BadUsernameOrPassword | ConnectReturnCode::NotAuthorized
        )
    }
}

impl From<u8> for ConnectReturnCode {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadUsernameOrPassword,
            _ => ConnectReturnCode::NotAuthorized,
        }
    }
}

/// Sent by the server in response to a `ConnectPacket`. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAckPacket {
    session_present: bool,
    return_code: ConnectReturnCode,
}

impl ConnectAckPacket {
    #[must_use]
    pub const fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self {
            session_present,
            return_code,
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub const fn return_code(&self) -> ConnectReturnCode {
        self.return_code
    }

    pub(crate) fn encode_variable(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let ack_flags = u8::from(self.session_present);
        buf.push(ack_flags);
        buf.push(self.return_code as u8);
        Ok(2)
    }
}

impl DecodePacket for ConnectAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let ack_flags = ba.read_byte()?;
        let session_present = ack_flags & 0b0000_0001 != 0;
        let return_code = ConnectReturnCode::from(ba.read_byte()?);
        // If CleanSession was not set and the return code is non-zero, the
        // session-present bit MUST be zero [MQTT-3.2.2-4]. We don't enforce
        // it here: malformed brokers are the server's problem, not ours.
        Ok(Self {
            session_present,
            return_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = ConnectAckPacket::new(true, ConnectReturnCode::Accepted);
        let mut buf = Vec::new();
        packet.encode_variable(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(ConnectAckPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_auth_failure_codes() {
        assert!(ConnectReturnCode::NotAuthorized.is_auth_failure());
        assert!(ConnectReturnCode::BadUsernameOrPassword.is_auth_failure());
        assert!(!ConnectReturnCode::ServerUnavailable.is_auth_failure());
    }
}
