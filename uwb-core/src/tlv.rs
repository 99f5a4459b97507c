//! # tlv
//!
//! BER-TLV encode/decode for the CSML dispatch-response envelope and the
//! session-data / termination TLVs it carries (spec §4.G, §4.F). Tag
//! constants live in `uwb_types` (`TAG_*`); this module only knows the
//! generic BER-TLV length rules.
//!
//! Length encoding follows ISO 7816-4 / X.690: lengths under 0x80 are a
//! single byte; 0x81 introduces one length byte, 0x82 introduces two
//! (big-endian). We do not emit 0x83+ since no TLV in this protocol
//! carries a payload over 65535 bytes.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(tag: u16, value: Vec<u8>) -> Self {
        Self { tag, value }
    }

    /// Encodes tag + BER length + value. Two-byte tags (anything with a
    /// nonzero high byte, e.g. `0xBF78`) are emitted as two tag bytes;
    /// one-byte tags (`0x71`, `0x80`..`0x82`, `0xE1`) as one.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 4);
        if self.tag > 0xFF {
            out.push((self.tag >> 8) as u8);
        }
        out.push((self.tag & 0xFF) as u8);
        encode_length(self.value.len(), &mut out);
        out.extend_from_slice(&self.value);
        out
    }

    /// Parses a single TLV from the front of `buf`, returning it plus the
    /// remaining unparsed tail.
    pub fn parse(buf: &[u8]) -> Result<(Tlv, &[u8])> {
        if buf.is_empty() {
            return Err(Error::Protocol("empty TLV buffer".into()));
        }
        let (tag, rest) = parse_tag(buf)?;
        let (len, rest) = parse_length(rest)?;
        if rest.len() < len {
            return Err(Error::Protocol(format!(
                "TLV tag {tag:#06x} declares length {len} but only {} bytes remain",
                rest.len()
            )));
        }
        let (value, tail) = rest.split_at(len);
        Ok((
            Tlv {
                tag,
                value: value.to_vec(),
            },
            tail,
        ))
    }

    /// Parses every TLV in `buf` until exhausted. Used for the composite
    /// dispatch-response body which chains `80`/`81`/`82` siblings.
    pub fn parse_all(mut buf: &[u8]) -> Result<Vec<Tlv>> {
        let mut out = Vec::new();
        while !buf.is_empty() {
            let (tlv, tail) = Tlv::parse(buf)?;
            out.push(tlv);
            buf = tail;
        }
        Ok(out)
    }

    pub fn find(tlvs: &[Tlv], tag: u16) -> Option<&Tlv> {
        tlvs.iter().find(|t| t.tag == tag)
    }
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push((len & 0xFF) as u8);
    }
}

fn parse_tag(buf: &[u8]) -> Result<(u16, &[u8])> {
    let first = buf[0];
    // Single-byte tag space used throughout this protocol: low tag number
    // forms (no 0x1F "more bytes follow" indicator) and the two-byte
    // private-class forms starting with 0xBF.
    if first == 0xBF {
        if buf.len() < 2 {
            return Err(Error::Protocol("truncated two-byte TLV tag".into()));
        }
        let tag = ((first as u16) << 8) | (buf[1] as u16);
        Ok((tag, &buf[2..]))
    } else {
        Ok((first as u16, &buf[1..]))
    }
}

fn parse_length(buf: &[u8]) -> Result<(usize, &[u8])> {
    if buf.is_empty() {
        return Err(Error::Protocol("truncated TLV length".into()));
    }
    match buf[0] {
        0x81 => {
            if buf.len() < 2 {
                return Err(Error::Protocol("truncated 0x81 TLV length".into()));
            }
            Ok((buf[1] as usize, &buf[2..]))
        }
        0x82 => {
            if buf.len() < 3 {
                return Err(Error::Protocol("truncated 0x82 TLV length".into()));
            }
            Ok((((buf[1] as usize) << 8) | buf[2] as usize, &buf[3..]))
        }
        n if n < 0x80 => Ok((n as usize, &buf[1..])),
        n => Err(Error::Protocol(format!("unsupported TLV length form {n:#04x}"))),
    }
}
