//! Data packet layer: header byte `[last-chaining-bit(1) | SECID(7)]` +
//! payload (spec §3 "FiRa Connector data packet", §4.D).

use uwb_types::{SECID_MAX, SECID_MIN};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub last: bool,
    pub secid: u8,
    pub payload: Vec<u8>,
}

impl DataPacket {
    pub fn new(last: bool, secid: u8, payload: Vec<u8>) -> Result<Self> {
        if !(SECID_MIN..=SECID_MAX).contains(&secid) {
            return Err(Error::Parameter(format!(
                "SECID {secid} outside reserved range {SECID_MIN}..={SECID_MAX}"
            )));
        }
        Ok(Self { last, secid, payload })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        let header = ((self.last as u8) << 7) | (self.secid & 0x7F);
        out.push(header);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(Error::Protocol("empty data packet".into()));
        }
        let header = buf[0];
        let last = header & 0x80 != 0;
        let secid = header & 0x7F;
        Ok(Self {
            last,
            secid,
            payload: buf[1..].to_vec(),
        })
    }
}

/// Splits `message` into data packets of at most `optimized_data_packet_size
/// - 1` payload bytes each, the last carrying `last=true` (spec §4.D "Send
/// message").
pub fn split_into_packets(secid: u8, message: &[u8], optimized_data_packet_size: u16) -> Result<Vec<DataPacket>> {
    if optimized_data_packet_size < 2 {
        return Err(Error::Parameter(format!(
            "optimizedDataPacketSize must be >= 2, got {optimized_data_packet_size}"
        )));
    }
    let chunk_size = (optimized_data_packet_size - 1) as usize;
    if message.is_empty() {
        return Ok(vec![DataPacket::new(true, secid, Vec::new())?]);
    }
    let mut packets = Vec::new();
    let chunks: Vec<&[u8]> = message.chunks(chunk_size).collect();
    let last_idx = chunks.len() - 1;
    for (i, chunk) in chunks.into_iter().enumerate() {
        packets.push(DataPacket::new(i == last_idx, secid, chunk.to_vec())?);
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_byte() {
        let p = DataPacket::new(true, 2, vec![0xAB, 0xCD]).unwrap();
        let encoded = p.encode();
        assert_eq!(encoded, vec![0x82, 0xAB, 0xCD]);
        let decoded = DataPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn rejects_reserved_secid() {
        assert!(DataPacket::new(true, 0, vec![]).is_err());
        assert!(DataPacket::new(true, 1, vec![]).is_err());
        assert!(DataPacket::new(true, 128, vec![]).is_err());
    }

    #[test]
    fn splits_into_expected_chunk_sizes() {
        // Scenario 2 from spec §8: optimizedDataPacketSize=21, 51-byte
        // payload -> chunk sizes 21,21,13 with the final chunk's last=true.
        let message = vec![0x03u8; 51];
        let packets = split_into_packets(2, &message, 21).unwrap();
        let sizes: Vec<usize> = packets.iter().map(|p| p.payload.len()).collect();
        assert_eq!(sizes, vec![20, 20, 11]);
        assert!(!packets[0].last);
        assert!(!packets[1].last);
        assert!(packets[2].last);
    }
}
