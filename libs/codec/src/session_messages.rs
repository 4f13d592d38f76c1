//! Session-layer message bodies
//!
//! These are the messages the session state machine itself exchanges. All
//! of them travel with protocol kind `Session` (no sequence byte).
//!
//! | Code   | Direction | Body |
//! |--------|-----------|------|
//! | 0x0310 | both      | [`Heartbeat`] |
//! | 0x3308 | request   | [`SessionConnect`] |
//! | 0x3308 | response  | [`SessionConnectResponse`] |
//! | 0x3309 | both      | [`SessionDisconnect`] |

use crate::constants::DISCONNECT_CONNECT_CODE;
use crate::error::CodecResult;
use crate::function_code::FunctionCode;
use crate::header::MessageHeader;
use crate::message::{CdefMessage, Message, MessageBody};
use crate::peek;
use crate::types::{DeviceType, ProtocolKind};
use crate::wire::{WireReader, WireWriter};

/// Keep-alive (0x0310)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub function_flags: u8,
}

impl MessageBody for Heartbeat {
    const FUNCTION_CODE: u16 = FunctionCode::Heartbeat as u16;
    const PROTOCOL: ProtocolKind = ProtocolKind::Session;

    fn decode_body(_header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            function_flags: reader.read_u8("heartbeat function flags")?,
        })
    }

    fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()> {
        writer.write_u8(self.function_flags);
        Ok(())
    }
}

/// Session Connect request (0x3308, response bit clear)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConnect {
    pub function_flags: u8,
    pub device_type: u8,
    pub terminal_number: u16,
}

impl SessionConnect {
    pub fn new(device_type: DeviceType, terminal_number: u16) -> Self {
        Self {
            function_flags: 0,
            device_type: device_type.into(),
            terminal_number,
        }
    }
}

impl Default for SessionConnect {
    fn default() -> Self {
        Self::new(DeviceType::default(), 0)
    }
}

impl MessageBody for SessionConnect {
    const FUNCTION_CODE: u16 = FunctionCode::SessionEstablishmentConnect as u16;
    const PROTOCOL: ProtocolKind = ProtocolKind::Session;

    fn decode_body(_header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            function_flags: reader.read_u8("connect function flags")?,
            device_type: reader.read_u8("connect device type")?,
            terminal_number: reader.read_u16("connect terminal number")?,
        })
    }

    fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()> {
        writer.write_u8(self.function_flags);
        writer.write_u8(self.device_type);
        writer.write_u16(self.terminal_number);
        Ok(())
    }
}

/// Session Connect response (0x3308, response bit set)
///
/// A non-zero `connect_code` rejects the session; `time_difference` is then
/// the retry delay in milliseconds the peer asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConnectResponse {
    pub function_flags: u8,
    pub device_type: u8,
    pub terminal_number: u16,
    pub connect_code: u32,
    pub time_difference: i32,
    pub connection_text: String,
}

impl SessionConnectResponse {
    pub fn accepted() -> Self {
        Self::default()
    }

    pub fn rejected(connect_code: u32, retry_ms: i32, text: impl Into<String>) -> Self {
        Self {
            connect_code,
            time_difference: retry_ms,
            connection_text: text.into(),
            ..Default::default()
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.connect_code == 0
    }
}

impl MessageBody for SessionConnectResponse {
    const FUNCTION_CODE: u16 = FunctionCode::SessionEstablishmentConnect as u16;
    const PROTOCOL: ProtocolKind = ProtocolKind::Session;

    fn decode_body(_header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            function_flags: reader.read_u8("connect function flags")?,
            device_type: reader.read_u8("connect device type")?,
            terminal_number: reader.read_u16("connect terminal number")?,
            connect_code: reader.read_u32("connect code")?,
            time_difference: reader.read_i32("time difference")?,
            connection_text: reader.read_ascii8("connection text")?,
        })
    }

    fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()> {
        writer.write_u8(self.function_flags);
        writer.write_u8(self.device_type);
        writer.write_u16(self.terminal_number);
        writer.write_u32(self.connect_code);
        writer.write_i32(self.time_difference);
        writer.write_ascii8(&self.connection_text, "connection text")
    }
}

/// Session Disconnect (0x3309)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionDisconnect {
    pub function_flags: u8,
    pub connect_code: u32,
    pub time_difference: i32,
    pub disconnection_text: String,
}

impl SessionDisconnect {
    /// Disconnect raised locally with a reason
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            connect_code: DISCONNECT_CONNECT_CODE,
            disconnection_text: reason.into(),
            ..Default::default()
        }
    }
}

impl MessageBody for SessionDisconnect {
    const FUNCTION_CODE: u16 = FunctionCode::SessionEstablishmentDisconnect as u16;
    const PROTOCOL: ProtocolKind = ProtocolKind::Session;

    fn decode_body(_header: &MessageHeader, reader: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            function_flags: reader.read_u8("disconnect function flags")?,
            connect_code: reader.read_u32("disconnect connect code")?,
            time_difference: reader.read_i32("disconnect time difference")?,
            disconnection_text: reader.read_ascii8("disconnection text")?,
        })
    }

    fn encode_body(&self, writer: &mut WireWriter) -> CodecResult<()> {
        writer.write_u8(self.function_flags);
        writer.write_u32(self.connect_code);
        writer.write_i32(self.time_difference);
        writer.write_ascii8(&self.disconnection_text, "disconnection text")
    }
}

/// Registry decoder for 0x3308: the response bit selects the body
pub fn decode_session_connect(bytes: &[u8]) -> CodecResult<Box<dyn CdefMessage>> {
    if peek::is_response(bytes) {
        Ok(Box::new(Message::<SessionConnectResponse>::decode(bytes)?))
    } else {
        Ok(Box::new(Message::<SessionConnect>::decode(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SessionDescriptor;

    #[test]
    fn test_heartbeat_is_session_protocol() {
        let bytes = Message::new(Heartbeat::default()).encode().unwrap();
        assert_eq!(bytes.len(), 17 + 1);
        assert!(peek::is_heartbeat(&bytes));
    }

    #[test]
    fn test_connect_response_round_trip() {
        let body = SessionConnectResponse::rejected(5, 30_000, "busy");
        let message = Message::response(body.clone())
            .addressed(SessionDescriptor::pack(0, 12, 25, 3), SessionDescriptor::pack(0, 0, 1, 1));
        let bytes = message.encode().unwrap();

        let decoded = decode_session_connect(&bytes).unwrap();
        let typed = decoded.downcast_ref::<SessionConnectResponse>().unwrap();
        assert_eq!(typed.body(), Some(&body));
        assert!(!typed.body().unwrap().is_accepted());
    }

    #[test]
    fn test_connect_request_selected_without_response_bit() {
        let bytes = Message::new(SessionConnect::new(DeviceType::Rwt, 17))
            .encode()
            .unwrap();
        let decoded = decode_session_connect(&bytes).unwrap();
        let typed = decoded.downcast_ref::<SessionConnect>().unwrap();
        assert_eq!(typed.body().unwrap().device_type, 0x52);
        assert_eq!(typed.body().unwrap().terminal_number, 17);
    }

    #[test]
    fn test_disconnect_reason() {
        let body = SessionDisconnect::with_reason("shutdown");
        assert_eq!(body.connect_code, 0x42);
        let bytes = Message::new(body.clone()).encode().unwrap();
        let decoded = Message::<SessionDisconnect>::decode(&bytes).unwrap();
        assert_eq!(decoded.body(), Some(&body));
    }
}
