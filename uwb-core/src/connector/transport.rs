//! Framing + reassembly, the hard part of §4.D. [`GattLink`] is the
//! supplemented transport trait boundary (§4.D.1): the real BLE radio
//! bindings are out of scope, so framing is written against this trait
//! and [`PairedLink`] (an in-process, channel-backed implementation)
//! stands in for it in tests and in `uwb-hal-sim`'s demo path.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use uwb_types::ConnectorCapabilities;

use crate::connector::message::ConnectorMessage;
use crate::connector::packet::{split_into_packets, DataPacket};
use crate::error::{Error, Result};

/// Transport-level termination causes (§4.D "Error surface"). Ordered:
/// a remote disconnect supersedes any pending write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    RemoteDisconnect,
    DescriptorWriteFailure,
    CharacteristicReadFailure,
    CharacteristicWriteFailure,
    ServiceDiscoveryFailure,
}

impl TerminationReason {
    fn priority(self) -> u8 {
        match self {
            TerminationReason::RemoteDisconnect => 0,
            _ => 1,
        }
    }
}

/// Accumulates termination causes observed in a tick and resolves them to
/// exactly one, honoring the ordering rule above. Fires at most once.
#[derive(Default)]
pub struct TerminationTracker {
    pending: Mutex<Vec<TerminationReason>>,
    fired: std::sync::atomic::AtomicBool,
}

impl TerminationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, reason: TerminationReason) {
        if self.fired.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.pending.lock().unwrap().push(reason);
    }

    /// Picks the highest-priority observed reason and marks this tracker
    /// fired. Returns `None` if nothing was observed or it already fired.
    pub fn resolve(&self) -> Option<TerminationReason> {
        if self
            .fired
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return None;
        }
        let mut pending = self.pending.lock().unwrap();
        let resolved = pending.drain(..).min_by_key(|r| r.priority());
        if resolved.is_none() {
            // Nothing was actually pending; un-fire so a later real
            // termination can still resolve.
            self.fired.store(false, std::sync::atomic::Ordering::SeqCst);
        }
        resolved
    }
}

/// The transport trait boundary a real BLE GATT server/client binding
/// would implement. Deliberately synchronous and non-blocking: the owning
/// transport-executor task polls `poll_recv` in its own loop (spec §5
/// "transport executor").
pub trait GattLink: Send + Sync {
    fn send(&self, bytes: Vec<u8>) -> Result<()>;
    fn poll_recv(&self) -> Option<Vec<u8>>;
}

/// In-process, channel-backed `GattLink` pair used by tests and by
/// `uwb-hal-sim`'s discovery/transport demo.
pub struct PairedLink {
    outbound: std_mpsc::Sender<Vec<u8>>,
    inbound: Mutex<std_mpsc::Receiver<Vec<u8>>>,
}

impl PairedLink {
    pub fn pair() -> (Arc<PairedLink>, Arc<PairedLink>) {
        let (tx_a, rx_a) = std_mpsc::channel();
        let (tx_b, rx_b) = std_mpsc::channel();
        (
            Arc::new(PairedLink {
                outbound: tx_b,
                inbound: Mutex::new(rx_a),
            }),
            Arc::new(PairedLink {
                outbound: tx_a,
                inbound: Mutex::new(rx_b),
            }),
        )
    }
}

impl GattLink for PairedLink {
    fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound
            .send(bytes)
            .map_err(|_| Error::Transport("peer link disconnected".into()))
    }

    fn poll_recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().unwrap().try_recv().ok()
    }
}

/// Drives the packet/message framing over one `GattLink`, for one local
/// SECID. Accumulates inbound packets per-SECID and dispatches whole
/// messages once the last-chaining-bit packet arrives.
pub struct FramedConnector {
    link: Arc<dyn GattLink>,
    local_secid: u8,
    capabilities: ConnectorCapabilities,
    reassembly: Mutex<HashMap<u8, Vec<u8>>>,
}

impl FramedConnector {
    pub fn new(link: Arc<dyn GattLink>, local_secid: u8, capabilities: ConnectorCapabilities) -> Self {
        Self {
            link,
            local_secid,
            capabilities,
            reassembly: Mutex::new(HashMap::new()),
        }
    }

    /// Splits and sends `message`, rejecting payloads over
    /// `maxMessageBufferSize` (spec §4.D "Send message").
    pub fn send_message(&self, message: &ConnectorMessage) -> Result<()> {
        let encoded = message.encode();
        if encoded.len() as u32 > self.capabilities.max_message_buffer_size {
            return Err(Error::Parameter(format!(
                "message of {} bytes exceeds maxMessageBufferSize {}",
                encoded.len(),
                self.capabilities.max_message_buffer_size
            )));
        }
        let packets = split_into_packets(self.local_secid, &encoded, self.capabilities.optimized_data_packet_size)?;
        for packet in packets {
            self.link.send(packet.encode())?;
        }
        Ok(())
    }

    /// Feeds one raw inbound packet. Packets addressed to a SECID other
    /// than ours are dropped without delivery and without affecting
    /// transport state (spec §8 "SECID rejection"). Returns the
    /// reassembled message once its final packet arrives.
    pub fn receive_packet(&self, bytes: &[u8]) -> Result<Option<ConnectorMessage>> {
        let packet = DataPacket::decode(bytes)?;
        if packet.secid != self.local_secid {
            return Ok(None);
        }
        let mut reassembly = self.reassembly.lock().unwrap();
        let buf = reassembly.entry(packet.secid).or_default();
        buf.extend_from_slice(&packet.payload);
        if !packet.last {
            return Ok(None);
        }
        let complete = reassembly.remove(&packet.secid).unwrap_or_default();
        drop(reassembly);
        let message = ConnectorMessage::decode(&complete)?;
        Ok(Some(message))
    }

    /// Drains everything currently buffered on the underlying link,
    /// yielding every message fully reassembled in the process. Mirrors
    /// the body of the dedicated transport-executor task loop.
    pub fn drain(&self) -> Result<Vec<ConnectorMessage>> {
        let mut messages = Vec::new();
        while let Some(bytes) = self.link.poll_recv() {
            if let Some(message) = self.receive_packet(&bytes)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::message::ConnectorMessage;
    use uwb_types::{ConnectorInstructionCode, ConnectorMessageType};

    fn caps(optimized: u16, max_buf: u32) -> ConnectorCapabilities {
        ConnectorCapabilities {
            optimized_data_packet_size: optimized,
            max_message_buffer_size: max_buf,
            secure_components: vec![],
        }
    }

    #[test]
    fn three_packet_round_trip_over_paired_link() {
        let (a, b) = PairedLink::pair();
        let sender = FramedConnector::new(a, 2, caps(21, 265));
        let receiver = FramedConnector::new(b, 2, caps(21, 265));

        let message = ConnectorMessage {
            message_type: ConnectorMessageType::Event,
            instruction_code: ConnectorInstructionCode::DataExchange,
            payload: vec![0x03; 51],
        };
        sender.send_message(&message).unwrap();

        let received = receiver.drain().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], message);
    }

    #[test]
    fn oversized_message_is_rejected_before_sending() {
        let (a, _b) = PairedLink::pair();
        let sender = FramedConnector::new(a, 2, caps(21, 10));
        let message = ConnectorMessage {
            message_type: ConnectorMessageType::Command,
            instruction_code: ConnectorInstructionCode::DataExchange,
            payload: vec![0u8; 100],
        };
        assert!(sender.send_message(&message).is_err());
    }

    #[test]
    fn mismatched_secid_is_dropped_without_terminating() {
        let (a, b) = PairedLink::pair();
        let sender = FramedConnector::new(a, 5, caps(21, 265));
        let receiver = FramedConnector::new(b, 2, caps(21, 265));

        let message = ConnectorMessage {
            message_type: ConnectorMessageType::Event,
            instruction_code: ConnectorInstructionCode::DataExchange,
            payload: vec![0x01; 5],
        };
        sender.send_message(&message).unwrap();

        let received = receiver.drain().unwrap();
        assert!(received.is_empty(), "packet for foreign SECID must be silently dropped");
    }

    #[test]
    fn remote_disconnect_supersedes_pending_write_failure() {
        let tracker = TerminationTracker::new();
        tracker.observe(TerminationReason::CharacteristicWriteFailure);
        tracker.observe(TerminationReason::RemoteDisconnect);
        assert_eq!(tracker.resolve(), Some(TerminationReason::RemoteDisconnect));
        // Fires exactly once.
        tracker.observe(TerminationReason::DescriptorWriteFailure);
        assert_eq!(tracker.resolve(), None);
    }
}
