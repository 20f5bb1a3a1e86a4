//! Protocol frame types

use bytes::Bytes;
use std::fmt;

/// Message type carried in the first body byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Control link authentication, uri carries the client key
    Auth,
    /// Open a tunnel circuit, uri is the user id and data the backend address
    Connect,
    /// Close a tunnel circuit
    Disconnect,
    /// Relay payload
    Transfer,
    /// Writability of the peer side changed
    WriteControl,
    /// Keepalive
    Heartbeat,
    /// Any opcode this client does not know about
    Unknown(u8),
}

impl MessageType {
    pub const AUTH: u8 = 0x01;
    pub const CONNECT: u8 = 0x03;
    pub const DISCONNECT: u8 = 0x04;
    pub const TRANSFER: u8 = 0x05;
    pub const WRITE_CONTROL: u8 = 0x06;
    pub const HEARTBEAT: u8 = 0x07;
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            Self::AUTH => MessageType::Auth,
            Self::CONNECT => MessageType::Connect,
            Self::DISCONNECT => MessageType::Disconnect,
            Self::TRANSFER => MessageType::Transfer,
            Self::WRITE_CONTROL => MessageType::WriteControl,
            Self::HEARTBEAT => MessageType::Heartbeat,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Auth => MessageType::AUTH,
            MessageType::Connect => MessageType::CONNECT,
            MessageType::Disconnect => MessageType::DISCONNECT,
            MessageType::Transfer => MessageType::TRANSFER,
            MessageType::WriteControl => MessageType::WRITE_CONTROL,
            MessageType::Heartbeat => MessageType::HEARTBEAT,
            MessageType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Auth => write!(f, "AUTH"),
            MessageType::Connect => write!(f, "CONNECT"),
            MessageType::Disconnect => write!(f, "DISCONNECT"),
            MessageType::Transfer => write!(f, "TRANSFER"),
            MessageType::WriteControl => write!(f, "WRITE_CONTROL"),
            MessageType::Heartbeat => write!(f, "HEARTBEAT"),
            MessageType::Unknown(other) => write!(f, "UNKNOWN(0x{:02x})", other),
        }
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    /// Tracing id, never used to match requests with responses
    pub serial_number: u64,
    /// Tunnel/user identifier, or the client key for AUTH
    pub uri: String,
    pub data: Bytes,
}

impl Frame {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            serial_number: 0,
            uri: String::new(),
            data: Bytes::new(),
        }
    }

    pub fn with_serial_number(mut self, serial_number: u64) -> Self {
        self.serial_number = serial_number;
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Authentication frame presenting the client key
    pub fn auth(client_key: &str) -> Self {
        Self::new(MessageType::Auth).with_uri(client_key)
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat)
    }

    pub fn connect(uri: impl Into<String>, serial_number: u64) -> Self {
        Self::new(MessageType::Connect)
            .with_uri(uri)
            .with_serial_number(serial_number)
    }

    pub fn disconnect(uri: impl Into<String>) -> Self {
        Self::new(MessageType::Disconnect).with_uri(uri)
    }

    pub fn transfer(uri: impl Into<String>, serial_number: u64, data: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Transfer)
            .with_uri(uri)
            .with_serial_number(serial_number)
            .with_data(data)
    }

    /// Writability signal: a single `1` byte for writable, `0` otherwise
    pub fn write_control(uri: impl Into<String>, writable: bool) -> Self {
        Self::new(MessageType::WriteControl)
            .with_uri(uri)
            .with_data(vec![writable as u8])
    }

    /// Body length as written in the length prefix
    pub fn body_length(&self) -> usize {
        crate::MIN_BODY_LENGTH + self.uri.len() + self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        for opcode in [0x01u8, 0x03, 0x04, 0x05, 0x06, 0x07] {
            let message_type = MessageType::from(opcode);
            assert!(!matches!(message_type, MessageType::Unknown(_)));
            assert_eq!(u8::from(message_type), opcode);
        }

        assert_eq!(MessageType::from(0x02), MessageType::Unknown(0x02));
        assert_eq!(u8::from(MessageType::Unknown(0x42)), 0x42);
    }

    #[test]
    fn test_body_length() {
        assert_eq!(Frame::heartbeat().body_length(), 10);

        let frame = Frame::transfer("user42", 7, vec![1, 2, 3]);
        assert_eq!(frame.body_length(), 10 + 6 + 3);
    }

    #[test]
    fn test_write_control_payload() {
        assert_eq!(Frame::write_control("u", true).data.as_ref(), &[1]);
        assert_eq!(Frame::write_control("u", false).data.as_ref(), &[0]);
    }
}
