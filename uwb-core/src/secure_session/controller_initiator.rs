//! Controller-Initiator sub-session (spec §4.H.3): fetches the remote
//! controlee info, derives session data (an opaque applet computation we
//! model as a local `PUT DO BF78`), pushes it to the controlee, and waits
//! for RDS confirmation.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::apdu::CommandApdu;
use crate::secure_channel::{FiraSecureChannel, SecureEvent};
use uwb_types::{TAG_CONTROLEE_INFO, TAG_SESSION_DATA};

use super::common::{commit_local_session_data, common_abort, next_event, notification_has_rds_available, SecureSessionOutcome};

pub struct ControllerInitiator {
    channel: Arc<FiraSecureChannel>,
    events: mpsc::UnboundedReceiver<SecureEvent>,
    /// Whether the local applet also needs the derived session data
    /// committed to it (spec §4.H.3 "If the local applet needs it too").
    local_applet_needs_session_data: bool,
}

impl ControllerInitiator {
    pub fn new(
        channel: Arc<FiraSecureChannel>,
        events: mpsc::UnboundedReceiver<SecureEvent>,
        local_applet_needs_session_data: bool,
    ) -> Self {
        Self {
            channel,
            events,
            local_applet_needs_session_data,
        }
    }

    pub async fn run(mut self) -> SecureSessionOutcome {
        if let Err(e) = self.request_controlee_info() {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(e.to_string());
        }

        let controlee_info = match next_event(&mut self.events).await {
            SecureEvent::DispatchResponseAvailable(d) => match d.payload {
                Some(info) if info.starts_with(&TAG_CONTROLEE_INFO.to_be_bytes()) => info,
                _ => {
                    self.channel.terminate_locally();
                    return SecureSessionOutcome::SessionAborted("controlee info missing from dispatch".into());
                }
            },
            other => return self.abort_on(other),
        };

        // The session-data derivation algorithm itself is owned by the
        // applet; we only carry the opaque bytes it returns.
        let session_data = match derive_session_data(&controlee_info) {
            Ok(data) => data,
            Err(e) => {
                self.channel.terminate_locally();
                return SecureSessionOutcome::SessionAborted(e.to_string());
            }
        };

        if let Err(e) = self.push_session_data(&session_data) {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted(e.to_string());
        }

        let dispatch = match next_event(&mut self.events).await {
            SecureEvent::DispatchResponseAvailable(d) => d,
            other => return self.abort_on(other),
        };
        if dispatch.status_word != Some(crate::apdu::SW_SUCCESS) || !notification_has_rds_available(&dispatch) {
            self.channel.terminate_locally();
            return SecureSessionOutcome::SessionAborted("controlee did not confirm RDS availability".into());
        }

        if self.local_applet_needs_session_data {
            if let Err(e) = commit_local_session_data(&self.channel, &session_data) {
                self.channel.terminate_locally();
                return SecureSessionOutcome::SessionAborted(e.to_string());
            }
        }

        SecureSessionOutcome::SessionDataReady {
            data: session_data,
            rds_already_armed: true,
        }
    }

    fn request_controlee_info(&self) -> crate::error::Result<()> {
        let apdu = CommandApdu::get_do(&TAG_CONTROLEE_INFO.to_be_bytes());
        self.channel.tunnel_to_remote_device(&apdu.encode()?)
    }

    fn push_session_data(&self, data: &[u8]) -> crate::error::Result<()> {
        let apdu = CommandApdu::put_do(&TAG_SESSION_DATA.to_be_bytes(), data);
        self.channel.tunnel_to_remote_device(&apdu.encode()?)
    }

    fn abort_on(&self, event: SecureEvent) -> SecureSessionOutcome {
        self.channel.terminate_locally();
        common_abort(&event).unwrap_or(SecureSessionOutcome::SessionAborted("unexpected event".into()))
    }
}

fn derive_session_data(controlee_info: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut data = TAG_SESSION_DATA.to_be_bytes().to_vec();
    data.push(controlee_info.len() as u8);
    data.extend_from_slice(controlee_info);
    Ok(data)
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
    async fn happy_path_derives_and_confirms_session_data() {
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

        let controlee_info = Tlv::new(0xBF70, vec![0x01, 0x02]).encode();
        let info_dispatch = Tlv::new(0x71, Tlv::new(0x82, controlee_info.clone()).encode()).encode();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: info_dispatch,
            })
            .unwrap();

        let rds_dispatch = Tlv::new(
            0x71,
            [
                Tlv::new(0x81, vec![0x90, 0x00]).encode(),
                Tlv::new(0xE1, Tlv::new(0x82, vec![0x01, 0x01]).encode()).encode(),
            ]
            .concat(),
        )
        .encode();
        channel
            .deliver_inbound(ConnectorMessage {
                message_type: ConnectorMessageType::CommandRespond,
                instruction_code: ConnectorInstructionCode::DataExchange,
                payload: rds_dispatch,
            })
            .unwrap();

        let sub_session = ControllerInitiator::new(channel, events, true);
        match sub_session.run().await {
            SecureSessionOutcome::SessionDataReady { rds_already_armed, .. } => assert!(rds_already_armed),
            other => panic!("expected SessionDataReady, got {other:?}"),
        }
    }
}
