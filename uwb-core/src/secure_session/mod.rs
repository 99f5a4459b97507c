//! Secure ranging sub-sessions (spec §4.H): the four concrete variants
//! that drive `secure_channel` to agree on session data and learn RDS
//! availability. Each runs on its own cooperative `tokio` task (spec §5).

pub mod common;
pub mod controlee_initiator;
pub mod controlee_responder;
pub mod controller_initiator;
pub mod controller_responder;

pub use common::SecureSessionOutcome;
pub use controlee_initiator::ControleeInitiator;
pub use controlee_responder::ControleeResponder;
pub use controller_initiator::ControllerInitiator;
pub use controller_responder::ControllerResponder;
