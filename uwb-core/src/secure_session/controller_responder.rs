//! Controller-Responder sub-session (spec §4.H.4): waits for the
//! applet's controlee-info notification, derives session data, commits
//! it locally, then waits for RDS-available.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::secure_channel::{FiraSecureChannel, SecureEvent};
use uwb_types::TAG_CONTROLEE_INFO;

use super::common::{commit_local_session_data, common_abort, next_event, notification_has_rds_available, SecureSessionOutcome};

pub struct ControllerResponder {
    channel: Arc<FiraSecureChannel>,
    events: mpsc::UnboundedReceiver<SecureEvent>,
}

impl ControllerResponder {
    pub fn new(channel: Arc<FiraSecureChannel>, events: mpsc::UnboundedReceiver<SecureEvent>) -> Self {
        Self { channel, events }
    }

    pub async fn run(mut self) -> SecureSessionOutcome {
        let controlee_info = loop {
            let dispatch = match next_event(&mut self.events).await {
                SecureEvent::DispatchResponseAvailable(d) => d,
                other => return self.abort_on(other),
            };
            if let Some(notification) = &dispatch.notification {
                if let Some(info) = crate::tlv::Tlv::find(notification, TAG_CONTROLEE_INFO) {
                    break info.value.clone();
                }
            }
            if let Some(payload) = &dispatch.payload {
                if payload.starts_with(&TAG_CONTROLEE_INFO.to_be_bytes()) {
                    break payload.clone();
                }
            }
            // Not the notification we're waiting for; keep draining.
        };

        let session_data = derive_session_data(&controlee_info);
        if let Err(e) = commit_local_session_data(&self.channel, &session_data) {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(e.to_string());
        }

        loop {
            let dispatch = match next_event(&mut self.events).await {
                SecureEvent::DispatchResponseAvailable(d) => d,
                other => return self.abort_on(other),
            };
            if notification_has_rds_available(&dispatch) {
                return SecureSessionOutcome::SessionDataReady {
                    data: session_data,
                    rds_already_armed: true,
                };
            }
        }
    }

    fn abort_on(&self, event: SecureEvent) -> SecureSessionOutcome {
        self.channel.terminate_locally();
        common_abort(&event).unwrap_or(SecureSessionOutcome::SessionAborted("unexpected event".into()))
    }
}

fn derive_session_data(controlee_info: &[u8]) -> Vec<u8> {
    let mut data = uwb_types::TAG_SESSION_DATA.to_be_bytes().to_vec();
    data.push(controlee_info.len() as u8);
    data.extend_from_slice(controlee_info);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorMessage, FramedConnector, PairedLink};
    use crate::secure_channel::FiraAppletSim;
    use crate::tlv::Tlv;
    use uwb_types::{ConnectorCapabilities, ConnectorInstructionCode, ConnectorMessageType};

    fn caps() -> ConnectorCapabilities {
        ConnectorCapabilities {
            optimized_data_packet_size: 64,
            max_message_buffer_size: 4096,
            secure_components: vec![],
        }
    }

    #[tokio::test]
    async fn waits_for_controlee_info_then_rds() {
        let se = Arc::new(FiraAppletSim::new());
        se.queue_response(crate::apdu::ResponseApdu {
            data: vec![],
            sw: crate::apdu::SW_SUCCESS,
        });
        let (link, _peer) = PairedLink::pair();
        let transport = Arc::new(FramedConnector::new(link, 2, caps()));
        let (channel, events) = FiraSecureChannel::new(se, transport);
        channel.establish(&[0x01]).unwrap();
        let channel = Arc::new(channel);

        let notification = Tlv::new(TAG_CONTROLEE_INFO, vec![0x03, 0x80, 0x01, 0x01]).encode();
        let info_dispatch = Tlv::new(0x71, Tlv::new(0xE1, notification).encode()).encode();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::Event,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: info_dispatch,
            })
            .unwrap();

        let rds_dispatch = Tlv::new(0x71, Tlv::new(0xE1, Tlv::new(0x82, vec![0x01, 0x01]).encode()).encode()).encode();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::Event,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: rds_dispatch,
            })
            .unwrap();

        let sub_session = ControllerResponder::new(channel, events);
        match sub_session.run().await {
            SecureSessionOutcome::SessionDataReady { rds_already_armed, .. } => assert!(rds_already_armed),
            other => panic!("expected SessionDataReady, got {other:?}"),
        }
    }
}
