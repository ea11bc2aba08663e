//! Inbound deliveries: pick the message text, decode it and hand a relay line to the chat.

use crate::channels::Relay;
use crate::coding::decode_text;
use crate::config::Verbosity;
use crate::smpp::{Body, InboundHandler, Pdu};
use std::sync::Arc;

/// Compose the relay line for an inbound PDU. Only deliver_sm produces one; every other
/// kind is ignored.
///
/// short_message wins whenever it is non-empty; otherwise the message_payload TLV
/// (long messages) is used.
pub fn relay_line(pdu: &Pdu, verbosity: Verbosity) -> Option<String> {
    let Body::DeliverSm(ref m) = pdu.body else {
        return None;
    };
    let payload = m.message_payload();
    if verbosity.messages() {
        log::info!(
            "ShortMessage: {:?}, MessagePayload: {:?}, Coding: {}",
            m.short_message,
            payload,
            m.data_coding
        );
    }
    let source: &[u8] = if m.short_message.is_empty() {
        payload.map(|p| &p[..]).unwrap_or_default()
    } else {
        &m.short_message
    };
    let text = decode_text(Some(m.data_coding), source);
    if verbosity.messages() {
        log::info!("Text: {:?}", text);
        if m.is_delivery_receipt() {
            log::info!("deliver_sm from {} is a delivery receipt", m.source_addr);
        }
    }
    Some(format!(
        "SMS from {} to {} :\n{}",
        m.source_addr, m.destination_addr, text
    ))
}

/// Session handler that relays every delivery to the chat without waiting for it.
pub struct RelayBridge {
    relay: Arc<dyn Relay>,
    verbosity: Verbosity,
}

impl RelayBridge {
    pub fn new(relay: Arc<dyn Relay>, verbosity: Verbosity) -> Self {
        Self { relay, verbosity }
    }
}

impl InboundHandler for RelayBridge {
    fn handle(&self, pdu: &Pdu) {
        if self.verbosity.messages() {
            log::info!("Message: {:?}", pdu);
        }
        let Some(line) = relay_line(pdu, self.verbosity) else {
            return;
        };
        let relay = self.relay.clone();
        tokio::spawn(async move {
            relay.relay(&line).await;
        });
    }
}
