//! SMPP 3.4 ESME side: PDU codec and a persistent transceiver session.
//!
//! The bridge only needs bind, submit, deliver and keep-alive, so that is all this covers.

mod error;
pub mod pdu;
mod session;

pub use error::{status_name, CodecError, SubmitError};
pub use pdu::{Body, MessageFields, Pdu, PduCodec};
pub use session::{
    ConnStatus, InboundHandler, ShortMessage, SmppSession, Submitter, Transceiver,
};
