//! FiRa Connector out-of-band transport (spec §4.D): packet framing,
//! message layering, and the reassembly/transport trait boundary.

pub mod message;
pub mod packet;
pub mod transport;

pub use message::ConnectorMessage;
pub use packet::DataPacket;
pub use transport::{FramedConnector, GattLink, PairedLink, TerminationReason, TerminationTracker};
