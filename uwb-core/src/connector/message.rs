//! Message layer: header byte `[message-type(2) | reserved(2) |
//! instruction-code(4)]` + payload (spec §3 "FiRa Connector message").
//! A message may span multiple data packets; reassembly lives in
//! `transport`.

use uwb_types::{ConnectorInstructionCode, ConnectorMessageType};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorMessage {
    pub message_type: ConnectorMessageType,
    pub instruction_code: ConnectorInstructionCode,
    pub payload: Vec<u8>,
}

impl ConnectorMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        let type_bits = encode_message_type(self.message_type) << 6;
        let code_bits = encode_instruction_code(self.instruction_code) & 0x0F;
        out.push(type_bits | code_bits);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::Protocol("empty connector message".into()));
        }
        let header = buf[0];
        let message_type = decode_message_type((header >> 6) & 0x03)?;
        let instruction_code = decode_instruction_code(header & 0x0F)?;
        Ok(Self {
            message_type,
            instruction_code,
            payload: buf[1..].to_vec(),
        })
    }
}

fn encode_message_type(t: ConnectorMessageType) -> u8 {
    match t {
        ConnectorMessageType::Command => 0,
        ConnectorMessageType::Event => 1,
        ConnectorMessageType::CommandRespond => 2,
    }
}

fn decode_message_type(bits: u8) -> Result<ConnectorMessageType> {
    match bits {
        0 => Ok(ConnectorMessageType::Command),
        1 => Ok(ConnectorMessageType::Event),
        2 => Ok(ConnectorMessageType::CommandRespond),
        other => Err(Error::Protocol(format!("unknown connector message-type bits {other:#04b}"))),
    }
}

fn encode_instruction_code(c: ConnectorInstructionCode) -> u8 {
    match c {
        ConnectorInstructionCode::DataExchange => 0,
        ConnectorInstructionCode::ErrorIndication => 1,
        ConnectorInstructionCode::CapabilitiesExchange => 2,
    }
}

fn decode_instruction_code(bits: u8) -> Result<ConnectorInstructionCode> {
    match bits {
        0 => Ok(ConnectorInstructionCode::DataExchange),
        1 => Ok(ConnectorInstructionCode::ErrorIndication),
        2 => Ok(ConnectorInstructionCode::CapabilitiesExchange),
        other => Err(Error::Protocol(format!("unknown connector instruction-code bits {other:#06b}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_event_data_exchange() {
        let msg = ConnectorMessage {
            message_type: ConnectorMessageType::Event,
            instruction_code: ConnectorInstructionCode::DataExchange,
            payload: vec![0x03; 51],
        };
        let encoded = msg.encode();
        assert_eq!(encoded[0], 0b0100_0000);
        let decoded = ConnectorMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_unknown_instruction_code() {
        assert!(ConnectorMessage::decode(&[0b0000_1111]).is_err());
    }
}
