//! Controlee-Responder sub-session (spec §4.H.2): passive — waits for
//! either an RDS-available notification or a session-data-inline
//! dispatch, and reacts to a remote session-termination message.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::secure_channel::{FiraSecureChannel, SecureEvent};
use uwb_types::TAG_SESSION_DATA;

use super::common::{common_abort, fetch_local_session_data, next_event, notification_has_rds_available, SecureSessionOutcome};

pub struct ControleeResponder {
    channel: Arc<FiraSecureChannel>,
    events: mpsc::UnboundedReceiver<SecureEvent>,
}

impl ControleeResponder {
    pub fn new(channel: Arc<FiraSecureChannel>, events: mpsc::UnboundedReceiver<SecureEvent>) -> Self {
        Self { channel, events }
    }

    pub async fn run(mut self) -> SecureSessionOutcome {
        loop {
            let event = next_event(&mut self.events).await;
            let dispatch = match event {
                SecureEvent::DispatchResponseAvailable(d) => d,
                other => {
                    self.channel.terminate_locally();
                    return common_abort(&other).unwrap_or(SecureSessionOutcome::SessionAborted("unexpected event".into()));
                }
            };

            if dispatch.is_transaction_complete_with_errors() {
                self.channel.terminate_locally();
                return SecureSessionOutcome::SessionAborted("transaction complete with errors".into());
            }

            if let Some(data) = &dispatch.payload {
                if data.starts_with(&TAG_SESSION_DATA.to_be_bytes()) {
                    return SecureSessionOutcome::SessionDataReady {
                        data: data.clone(),
                        rds_already_armed: false,
                    };
                }
                // A termination TLV (`BF79`) signals the remote tore the
                // session down before sending session data.
                if data.starts_with(&uwb_types::TAG_TERMINATION.to_be_bytes()) {
                    self.channel.terminate_locally();
                    return SecureSessionOutcome::SessionTerminated;
                }
            }

            if notification_has_rds_available(&dispatch) {
                return match fetch_local_session_data(&self.channel) {
                    Ok(data) => SecureSessionOutcome::SessionDataReady {
                        data,
                        rds_already_armed: false,
                    },
                    Err(e) => {
                        self.channel.terminate_locally();
                        SecureSessionOutcome::SessionAborted(e.to_string())
                    }
                };
            }
            // Neither shape yet: keep waiting for the next notification.
        }
    }
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
    async fn session_data_inline_surfaces_ready() {
        let se = Arc::new(FiraAppletSim::new());
        let (link, _peer) = PairedLink::pair();
        let transport = Arc::new(FramedConnector::new(link, 2, caps()));
        let (channel, events) = FiraSecureChannel::new(se, transport);
        channel.establish(&[0x01]).unwrap();
        let channel = Arc::new(channel);

        let session_data = Tlv::new(0xBF78, vec![0x01]).encode();
        let dispatch = Tlv::new(0x71, Tlv::new(0x82, session_data.clone()).encode()).encode();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::Event,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: dispatch,
            })
            .unwrap();

        let responder = ControleeResponder::new(channel, events);
        match responder.run().await {
            SecureSessionOutcome::SessionDataReady { data, .. } => assert_eq!(data, session_data),
            other => panic!("expected SessionDataReady, got {other:?}"),
        }
    }
}
