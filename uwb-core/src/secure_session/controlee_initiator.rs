//! Controlee-Initiator sub-session (spec §4.H.1): after the secure
//! channel establishes, pushes our own controlee info to the remote
//! applet, then fetches session data, handling the five response shapes
//! the applet may return.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::apdu::CommandApdu;
use crate::secure_channel::{FiraSecureChannel, OutboundKind, SecureEvent};
use uwb_types::{TAG_CONTROLEE_INFO, TAG_SESSION_DATA};

use super::common::{common_abort, fetch_local_session_data, next_event, notification_has_rds_available, SecureSessionOutcome};

/// Result of one tunnelled `GET DO BF78` attempt.
enum SessionDataAttempt {
    Outcome(SecureSessionOutcome),
    NotAvailable,
}

pub struct ControleeInitiator {
    channel: Arc<FiraSecureChannel>,
    events: mpsc::UnboundedReceiver<SecureEvent>,
    controlee_info: Vec<u8>,
}

impl ControleeInitiator {
    pub fn new(
        channel: Arc<FiraSecureChannel>,
        events: mpsc::UnboundedReceiver<SecureEvent>,
        controlee_info: Vec<u8>,
    ) -> Self {
        Self {
            channel,
            events,
            controlee_info,
        }
    }

    pub async fn run(mut self) -> SecureSessionOutcome {
        if let Err(e) = self.push_controlee_info() {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(e.to_string());
        }

        let dispatch = match next_event(&mut self.events).await {
            SecureEvent::DispatchResponseAvailable(d) => d,
            other => return self.abort_on(other),
        };
        if let Some(outcome) = common_abort(&SecureEvent::DispatchResponseAvailable(dispatch.clone())) {
            self.channel.terminate_locally();
            return outcome;
        }
        if dispatch.status_word != Some(crate::apdu::SW_SUCCESS) {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(format!(
                "controlee info push rejected: {:?}",
                dispatch.status_word
            ));
        }

        if let Err(e) = self.request_session_data() {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(e.to_string());
        }

        let dispatch = match next_event(&mut self.events).await {
            SecureEvent::DispatchResponseAvailable(d) => d,
            other => return self.abort_on(other),
        };
        match self.handle_session_data_response(dispatch) {
            SessionDataAttempt::Outcome(outcome) => outcome,
            SessionDataAttempt::NotAvailable => self.retry_session_data_once().await,
        }
    }

    /// Re-tunnels `GET DO BF78` once after a "session data not available"
    /// response, then aborts if the second response is still not available.
    async fn retry_session_data_once(&mut self) -> SecureSessionOutcome {
        if let Err(e) = self.request_session_data() {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(e.to_string());
        }

        let dispatch = match next_event(&mut self.events).await {
            SecureEvent::DispatchResponseAvailable(d) => d,
            other => return self.abort_on(other),
        };
        match self.handle_session_data_response(dispatch) {
            SessionDataAttempt::Outcome(outcome) => outcome,
            SessionDataAttempt::NotAvailable => {
                self.channel.terminate_locally();
                SecureSessionOutcome::SessionAborted("session data not available after retry".into())
            }
        }
    }

    fn push_controlee_info(&self) -> crate::error::Result<()> {
        let apdu = CommandApdu::put_do(&TAG_CONTROLEE_INFO.to_be_bytes(), &self.controlee_info);
        self.channel.tunnel_to_remote_device(&apdu.encode()?)
    }

    fn request_session_data(&self) -> crate::error::Result<()> {
        let apdu = CommandApdu::get_do(&TAG_SESSION_DATA.to_be_bytes());
        self.channel.tunnel_to_remote_device(&apdu.encode()?)
    }

    fn handle_session_data_response(
        &mut self,
        dispatch: crate::secure_channel::DispatchResponse,
    ) -> SessionDataAttempt {
        if dispatch.is_transaction_complete_with_errors() {
            self.channel.terminate_locally();
            self.channel.clean_up_terminated_or_aborted_session();
            return SessionDataAttempt::Outcome(SecureSessionOutcome::SessionAborted(
                "transaction complete with errors".into(),
            ));
        }

        if let Some(OutboundKind::ToRemote) = dispatch.outbound_kind {
            if let Some(payload) = &dispatch.payload {
                let _ = self.channel.send_raw_data_to_remote(payload);
            }
        }

        let rds_flag = notification_has_rds_available(&dispatch);

        match (&dispatch.payload, rds_flag) {
            // Session data inline, with or without the RDS flag.
            (Some(data), _) if data.starts_with(&TAG_SESSION_DATA.to_be_bytes()) => {
                SessionDataAttempt::Outcome(SecureSessionOutcome::SessionDataReady {
                    data: data.clone(),
                    rds_already_armed: false,
                })
            }
            // RDS flag set but no inline data: fetch from our own applet.
            (None, true) => match fetch_local_session_data(&self.channel) {
                Ok(data) => SessionDataAttempt::Outcome(SecureSessionOutcome::SessionDataReady {
                    data,
                    rds_already_armed: false,
                }),
                Err(e) => {
                    self.channel.terminate_locally();
                    SessionDataAttempt::Outcome(SecureSessionOutcome::SessionAborted(e.to_string()))
                }
            },
            // No data, no RDS flag yet: status reflects "not yet available".
            // Caller re-tunnels the request once before treating this as fatal.
            _ if dispatch.status_word == Some(crate::apdu::SW_DATA_NOT_AVAILABLE) => SessionDataAttempt::NotAvailable,
            _ => {
                self.channel.terminate_locally();
                SessionDataAttempt::Outcome(SecureSessionOutcome::SessionAborted(
                    "unrecognised session-data dispatch shape".into(),
                ))
            }
        }
    }

    fn abort_on(&self, event: SecureEvent) -> SecureSessionOutcome {
        self.channel.terminate_locally();
        common_abort(&event).unwrap_or(SecureSessionOutcome::SessionAborted("unexpected event".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorMessage, FramedConnector, PairedLink};
    use crate::secure_channel::FiraAppletSim;
    use uwb_types::{ConnectorCapabilities, ConnectorInstructionCode, ConnectorMessageType};

    fn caps() -> ConnectorCapabilities {
        ConnectorCapabilities {
            optimized_data_packet_size: 64,
            max_message_buffer_size: 4096,
            secure_components: vec![],
        }
    }

    #[tokio::test]
    async fn happy_path_session_data_inline() {
        let se = Arc::new(FiraAppletSim::new());
        let (link, _peer) = PairedLink::pair();
        let transport = Arc::new(FramedConnector::new(link, 2, caps()));
        let (channel, events) = FiraSecureChannel::new(se.clone(), transport);
        channel.establish(&[0x01]).unwrap();
        let channel = Arc::new(channel);

        let sub_session = ControleeInitiator::new(channel.clone(), events, vec![0xAA, 0xBB]);

        // Drive the dispatch responses the applet would deliver for each
        // tunnelled request, matching §8 scenario 1's shape.
        let push_ack = crate::tlv::Tlv::new(
            0x71,
            [
                crate::tlv::Tlv::new(0x81, vec![0x90, 0x00]).encode(),
            ]
            .concat(),
        )
        .encode();
        let session_data = crate::tlv::Tlv::new(0xBF78, vec![0x08, 0x02, 0x01, 0x01]).encode();
        let data_ready = crate::tlv::Tlv::new(
            0x71,
            [
                crate::tlv::Tlv::new(0x80, vec![0x81]).encode(),
                crate::tlv::Tlv::new(0x81, vec![0x90, 0x00]).encode(),
                crate::tlv::Tlv::new(0x82, session_data.clone()).encode(),
                crate::tlv::Tlv::new(0xE1, crate::tlv::Tlv::new(0x82, vec![0x01, 0x01]).encode()).encode(),
            ]
            .concat(),
        )
        .encode();

        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: push_ack,
            })
            .unwrap();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: data_ready,
            })
            .unwrap();

        let outcome = sub_session.run().await;
        match outcome {
            SecureSessionOutcome::SessionDataReady { data, rds_already_armed } => {
                assert_eq!(data, session_data);
                assert!(!rds_already_armed);
            }
            other => panic!("expected SessionDataReady, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_once_on_data_not_available_then_succeeds() {
        let se = Arc::new(FiraAppletSim::new());
        let (link, _peer) = PairedLink::pair();
        let transport = Arc::new(FramedConnector::new(link, 2, caps()));
        let (channel, events) = FiraSecureChannel::new(se.clone(), transport);
        channel.establish(&[0x01]).unwrap();
        let channel = Arc::new(channel);

        let sub_session = ControleeInitiator::new(channel.clone(), events, vec![0xAA, 0xBB]);

        let push_ack = crate::tlv::Tlv::new(
            0x71,
            [crate::tlv::Tlv::new(0x81, vec![0x90, 0x00]).encode()].concat(),
        )
        .encode();
        let not_available = crate::tlv::Tlv::new(
            0x71,
            [crate::tlv::Tlv::new(0x81, vec![0x87, 0x01]).encode()].concat(),
        )
        .encode();
        let session_data = crate::tlv::Tlv::new(0xBF78, vec![0x08, 0x02, 0x01, 0x01]).encode();
        let data_ready = crate::tlv::Tlv::new(
            0x71,
            [
                crate::tlv::Tlv::new(0x80, vec![0x81]).encode(),
                crate::tlv::Tlv::new(0x81, vec![0x90, 0x00]).encode(),
                crate::tlv::Tlv::new(0x82, session_data.clone()).encode(),
                crate::tlv::Tlv::new(0xE1, crate::tlv::Tlv::new(0x82, vec![0x01, 0x01]).encode()).encode(),
            ]
            .concat(),
        )
        .encode();

        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: push_ack,
            })
            .unwrap();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: not_available,
            })
            .unwrap();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: data_ready,
            })
            .unwrap();

        let outcome = sub_session.run().await;
        match outcome {
            SecureSessionOutcome::SessionDataReady { data, .. } => assert_eq!(data, session_data),
            other => panic!("expected SessionDataReady after one retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborts_after_second_data_not_available() {
        let se = Arc::new(FiraAppletSim::new());
        let (link, _peer) = PairedLink::pair();
        let transport = Arc::new(FramedConnector::new(link, 2, caps()));
        let (channel, events) = FiraSecureChannel::new(se.clone(), transport);
        channel.establish(&[0x01]).unwrap();
        let channel = Arc::new(channel);

        let sub_session = ControleeInitiator::new(channel.clone(), events, vec![0xAA, 0xBB]);

        let push_ack = crate::tlv::Tlv::new(
            0x71,
            [crate::tlv::Tlv::new(0x81, vec![0x90, 0x00]).encode()].concat(),
        )
        .encode();
        let not_available = crate::tlv::Tlv::new(
            0x71,
            [crate::tlv::Tlv::new(0x81, vec![0x87, 0x01]).encode()].concat(),
        )
        .encode();

        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: push_ack,
            })
            .unwrap();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: not_available.clone(),
            })
            .unwrap();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: not_available,
            })
            .unwrap();

        let outcome = sub_session.run().await;
        match outcome {
            SecureSessionOutcome::SessionAborted(msg) => assert!(msg.contains("after retry")),
            other => panic!("expected SessionAborted after retry, got {other:?}"),
        }
    }
}
