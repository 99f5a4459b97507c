//! Encodes simulated peer readings into the `RANGE_DATA_NTF` byte layout
//! `uwb-core`'s session manager decodes: 1 byte peer count, then per peer
//! `[addr_len][addr][status][distance:4][az:2][az_fom:1][el:2][el_fom:1]
//! [los:1][rssi:2][slot:1][seq:1]` when status is `Ok`, or just
//! `[addr_len][addr][status]` when not (see `uwb_core::session`).

/// One simulated peer reading, already noised.
pub struct SimPeerReading {
    pub address: Vec<u8>,
    pub los: bool,
    pub distance_cm: u32,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub azimuth_fom: u8,
    pub elevation_fom: u8,
    pub rssi_dbm: i16,
    pub slot_index: u8,
    pub frame_seq_num: u8,
}

fn encode_q9_7(degrees: f64) -> i16 {
    (degrees * 128.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

pub fn encode_range_data_ntf(readings: &[SimPeerReading]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + readings.len() * 16);
    out.push(readings.len() as u8);
    for reading in readings {
        out.push(reading.address.len() as u8);
        out.extend_from_slice(&reading.address);
        out.push(0); // status: Ok
        out.extend_from_slice(&reading.distance_cm.to_be_bytes());
        out.extend_from_slice(&encode_q9_7(reading.azimuth_deg).to_be_bytes());
        out.push(reading.azimuth_fom);
        out.extend_from_slice(&encode_q9_7(reading.elevation_deg).to_be_bytes());
        out.push(reading.elevation_fom);
        out.push(reading.los as u8);
        out.extend_from_slice(&reading.rssi_dbm.to_be_bytes());
        out.push(reading.slot_index);
        out.push(reading.frame_seq_num);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_peer_layout_matches_decoder_expectations() {
        let readings = vec![SimPeerReading {
            address: vec![0x01, 0x02],
            los: true,
            distance_cm: 150,
            azimuth_deg: 10.0,
            elevation_deg: -4.0,
            azimuth_fom: 80,
            elevation_fom: 70,
            rssi_dbm: -65,
            slot_index: 3,
            frame_seq_num: 9,
        }];
        let encoded = encode_range_data_ntf(&readings);
        // count, addr_len, addr(2), status, distance(4), az(2), az_fom, el(2), el_fom, los, rssi(2), slot, seq
        assert_eq!(encoded.len(), 1 + 1 + 2 + 1 + 4 + 2 + 1 + 2 + 1 + 1 + 2 + 1 + 1);
        assert_eq!(encoded[0], 1);
        assert_eq!(encoded[1], 2);
        assert_eq!(&encoded[2..4], &[0x01, 0x02]);
        assert_eq!(encoded[4], 0);
    }

    #[test]
    fn q9_7_round_trips_within_one_lsb() {
        let raw = encode_q9_7(10.0);
        let degrees = raw as f64 / 128.0;
        assert!((degrees - 10.0).abs() < 1.0 / 128.0);
    }
}
