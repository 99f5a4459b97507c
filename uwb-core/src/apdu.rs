//! # apdu
//!
//! ISO-7816 command/response APDU codec (spec §4.F). Encodes short-form
//! `Lc` (1-255 bytes of data) and falls back to the extended three-byte
//! form for longer data, per "short (Lc <= 255) and extended APDUs both
//! supported".

use crate::error::{Error, Result};

pub const SW_SUCCESS: u16 = 0x9000;
/// "Data not available yet": the controlee-initiator retries once on
/// this status before aborting (spec §4.H.1).
pub const SW_DATA_NOT_AVAILABLE: u16 = 0x8701;

pub const INS_GET_DO: u8 = 0xCB;
pub const INS_PUT_DO: u8 = 0xDB;
pub const P1_TAG: u8 = 0x3F;
pub const P2_TAG: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; `None` omits `Le` entirely, `Some(0)`
    /// encodes `Le = 00` (the "give me everything" convention).
    pub le: Option<u8>,
}

impl CommandApdu {
    pub fn get_do(tag: &[u8]) -> Self {
        Self {
            cla: 0x00,
            ins: INS_GET_DO,
            p1: P1_TAG,
            p2: P2_TAG,
            data: tag.to_vec(),
            le: Some(0x00),
        }
    }

    pub fn put_do(tag: &[u8], value: &[u8]) -> Self {
        let mut data = Vec::with_capacity(tag.len() + value.len());
        data.extend_from_slice(tag);
        data.extend_from_slice(value);
        Self {
            cla: 0x00,
            ins: INS_PUT_DO,
            p1: P1_TAG,
            p2: P2_TAG,
            data,
            le: None,
        }
    }

    /// Encodes `Lc` in short form when the data fits in one byte,
    /// otherwise in the three-byte extended form (`00 || len_hi || len_lo`).
    /// Errors rather than truncating when data exceeds the 65535-byte
    /// extended-form limit.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(7 + self.data.len() + 1);
        out.push(self.cla);
        out.push(self.ins);
        out.push(self.p1);
        out.push(self.p2);
        if !self.data.is_empty() {
            if self.data.len() <= 255 {
                out.push(self.data.len() as u8);
            } else if self.data.len() <= u16::MAX as usize {
                out.push(0x00);
                out.extend_from_slice(&(self.data.len() as u16).to_be_bytes());
            } else {
                return Err(Error::Parameter(format!(
                    "APDU data too long for extended Lc: {} bytes",
                    self.data.len()
                )));
            }
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(le);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    pub data: Vec<u8>,
    pub sw: u16,
}

impl ResponseApdu {
    pub fn is_success(&self) -> bool {
        self.sw == SW_SUCCESS
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        out.push((self.sw >> 8) as u8);
        out.push((self.sw & 0xFF) as u8);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::Protocol("response APDU shorter than SW1SW2".into()));
        }
        let (data, sw_bytes) = buf.split_at(buf.len() - 2);
        let sw = ((sw_bytes[0] as u16) << 8) | sw_bytes[1] as u16;
        Ok(Self {
            data: data.to_vec(),
            sw,
        })
    }

    /// Returns the matching error for a non-success status word, or
    /// `Ok(())` if `9000`. Used at every sub-session call site that
    /// doesn't specifically expect `SW_DATA_NOT_AVAILABLE`.
    pub fn require_success(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Protocol(format!("status word {:#06x}", self.sw)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_get_do_as_specified() {
        let cmd = CommandApdu::get_do(&[0xBF, 0x78]);
        let encoded = cmd.encode().unwrap();
        assert_eq!(encoded, hex::decode("00CB3FFF02BF7800").unwrap());
    }

    #[test]
    fn encodes_put_do_without_le() {
        let cmd = CommandApdu::put_do(&[0xBF, 0x70], &[0x01, 0x02]);
        let encoded = cmd.encode().unwrap();
        assert_eq!(encoded, hex::decode("00DB3FFF04BF700102").unwrap());
        assert!(cmd.le.is_none());
    }

    #[test]
    fn encodes_extended_lc_past_255_bytes() {
        let value = vec![0xAB; 300];
        let cmd = CommandApdu::put_do(&[0xBF, 0x70], &value);
        let encoded = cmd.encode().unwrap();
        let lc = cmd.data.len() as u16; // tag (2 bytes) + value (300 bytes) = 302
        assert_eq!(&encoded[..4], &[0x00, 0xDB, 0x3F, 0xFF]);
        assert_eq!(&encoded[4..7], &[0x00, (lc >> 8) as u8, (lc & 0xFF) as u8]);
        assert_eq!(encoded.len(), 7 + cmd.data.len());
    }

    #[test]
    fn rejects_data_longer_than_extended_lc_limit() {
        let cmd = CommandApdu::put_do(&[0xBF, 0x70], &vec![0u8; u16::MAX as usize + 1]);
        assert!(cmd.encode().is_err());
    }

    #[test]
    fn parses_success_response() {
        let buf = hex::decode("0102039000").unwrap();
        let resp = ResponseApdu::parse(&buf).unwrap();
        assert_eq!(resp.data, vec![0x01, 0x02, 0x03]);
        assert_eq!(resp.sw, SW_SUCCESS);
        assert!(resp.is_success());
        resp.require_success().unwrap();
    }

    #[test]
    fn parses_data_not_available() {
        let buf = hex::decode("8701").unwrap();
        let resp = ResponseApdu::parse(&buf).unwrap();
        assert_eq!(resp.sw, SW_DATA_NOT_AVAILABLE);
        assert!(resp.require_success().is_err());
    }

    #[test]
    fn rejects_too_short_buffer() {
        assert!(ResponseApdu::parse(&[0x90]).is_err());
    }
}
