//! SMPP 3.4 PDU model and wire codec.
//!
//! Covers what an ESME transceiver needs: bind, submit, deliver, keep-alive and unbind.
//! Anything else is kept as an opaque body so the session can nack it.

use crate::smpp::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_LEN: usize = 16;
pub const MAX_PDU_LEN: usize = 64 * 1024;
pub const MAX_SHORT_MESSAGE_LEN: usize = 254;
pub const INTERFACE_VERSION: u8 = 0x34;

pub const GENERIC_NACK: u32 = 0x8000_0000;
pub const SUBMIT_SM: u32 = 0x0000_0004;
pub const SUBMIT_SM_RESP: u32 = 0x8000_0004;
pub const DELIVER_SM: u32 = 0x0000_0005;
pub const DELIVER_SM_RESP: u32 = 0x8000_0005;
pub const UNBIND: u32 = 0x0000_0006;
pub const UNBIND_RESP: u32 = 0x8000_0006;
pub const BIND_TRANSCEIVER: u32 = 0x0000_0009;
pub const BIND_TRANSCEIVER_RESP: u32 = 0x8000_0009;
pub const ENQUIRE_LINK: u32 = 0x0000_0015;
pub const ENQUIRE_LINK_RESP: u32 = 0x8000_0015;
pub const ALERT_NOTIFICATION: u32 = 0x0000_0102;

pub const ESME_ROK: u32 = 0x0000_0000;
pub const ESME_RINVCMDID: u32 = 0x0000_0003;

pub const TAG_MESSAGE_PAYLOAD: u16 = 0x0424;

/// registered_delivery: request a receipt on final delivery outcome.
pub const FINAL_DELIVERY_RECEIPT: u8 = 0x01;

/// esm_class message type bits that mark a deliver_sm as an SMSC delivery receipt.
pub const ESM_CLASS_DELIVERY_RECEIPT: u8 = 0x04;

/// Optional parameter (tag, length, value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

/// bind_transceiver body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bind {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

/// Mandatory and optional fields shared by submit_sm and deliver_sm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFields {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub destination_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub tlvs: Vec<Tlv>,
}

impl MessageFields {
    /// The message_payload TLV, used for texts that do not fit in short_message.
    pub fn message_payload(&self) -> Option<&Bytes> {
        self.tlvs
            .iter()
            .find(|t| t.tag == TAG_MESSAGE_PAYLOAD)
            .map(|t| &t.value)
    }

    pub fn is_delivery_receipt(&self) -> bool {
        self.esm_class & 0x3C == ESM_CLASS_DELIVERY_RECEIPT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    GenericNack,
    BindTransceiver(Bind),
    BindTransceiverResp { system_id: String },
    SubmitSm(MessageFields),
    SubmitSmResp { message_id: String },
    DeliverSm(MessageFields),
    DeliverSmResp { message_id: String },
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    Other { command_id: u32, body: Bytes },
}

/// A decoded PDU: header status and sequence plus the typed body (which implies command_id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub status: u32,
    pub sequence: u32,
    pub body: Body,
}

impl Pdu {
    pub fn new(sequence: u32, body: Body) -> Self {
        Self {
            status: ESME_ROK,
            sequence,
            body,
        }
    }

    pub fn with_status(status: u32, sequence: u32, body: Body) -> Self {
        Self {
            status,
            sequence,
            body,
        }
    }

    pub fn command_id(&self) -> u32 {
        match &self.body {
            Body::GenericNack => GENERIC_NACK,
            Body::BindTransceiver(_) => BIND_TRANSCEIVER,
            Body::BindTransceiverResp { .. } => BIND_TRANSCEIVER_RESP,
            Body::SubmitSm(_) => SUBMIT_SM,
            Body::SubmitSmResp { .. } => SUBMIT_SM_RESP,
            Body::DeliverSm(_) => DELIVER_SM,
            Body::DeliverSmResp { .. } => DELIVER_SM_RESP,
            Body::Unbind => UNBIND,
            Body::UnbindResp => UNBIND_RESP,
            Body::EnquireLink => ENQUIRE_LINK,
            Body::EnquireLinkResp => ENQUIRE_LINK_RESP,
            Body::Other { command_id, .. } => *command_id,
        }
    }

    /// Responses have the high bit of command_id set.
    pub fn is_response(&self) -> bool {
        self.command_id() & 0x8000_0000 != 0
    }

    pub fn name(&self) -> &'static str {
        match &self.body {
            Body::GenericNack => "generic_nack",
            Body::BindTransceiver(_) => "bind_transceiver",
            Body::BindTransceiverResp { .. } => "bind_transceiver_resp",
            Body::SubmitSm(_) => "submit_sm",
            Body::SubmitSmResp { .. } => "submit_sm_resp",
            Body::DeliverSm(_) => "deliver_sm",
            Body::DeliverSmResp { .. } => "deliver_sm_resp",
            Body::Unbind => "unbind",
            Body::UnbindResp => "unbind_resp",
            Body::EnquireLink => "enquire_link",
            Body::EnquireLinkResp => "enquire_link_resp",
            Body::Other { .. } => "unknown",
        }
    }
}

fn get_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, CodecError> {
    if !buf.has_remaining() {
        return Err(CodecError::Truncated(field));
    }
    Ok(buf.get_u8())
}

fn get_cstring(buf: &mut Bytes, field: &'static str) -> Result<String, CodecError> {
    let nul = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or(CodecError::Unterminated(field))?;
    let s = String::from_utf8_lossy(&buf[..nul]).into_owned();
    buf.advance(nul + 1);
    Ok(s)
}

/// Response bodies may be omitted entirely when command_status is non-zero.
fn get_optional_cstring(buf: &mut Bytes, field: &'static str) -> Result<String, CodecError> {
    if buf.has_remaining() {
        get_cstring(buf, field)
    } else {
        Ok(String::new())
    }
}

fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

fn decode_bind(buf: &mut Bytes) -> Result<Bind, CodecError> {
    Ok(Bind {
        system_id: get_cstring(buf, "system_id")?,
        password: get_cstring(buf, "password")?,
        system_type: get_cstring(buf, "system_type")?,
        interface_version: get_u8(buf, "interface_version")?,
        addr_ton: get_u8(buf, "addr_ton")?,
        addr_npi: get_u8(buf, "addr_npi")?,
        address_range: get_cstring(buf, "address_range")?,
    })
}

fn encode_bind(bind: &Bind, dst: &mut BytesMut) {
    put_cstring(dst, &bind.system_id);
    put_cstring(dst, &bind.password);
    put_cstring(dst, &bind.system_type);
    dst.put_u8(bind.interface_version);
    dst.put_u8(bind.addr_ton);
    dst.put_u8(bind.addr_npi);
    put_cstring(dst, &bind.address_range);
}

fn decode_tlvs(buf: &mut Bytes) -> Result<Vec<Tlv>, CodecError> {
    let mut tlvs = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(CodecError::Truncated("tlv header"));
        }
        let tag = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(CodecError::Truncated("tlv value"));
        }
        tlvs.push(Tlv {
            tag,
            value: buf.split_to(len),
        });
    }
    Ok(tlvs)
}

fn decode_message(buf: &mut Bytes) -> Result<MessageFields, CodecError> {
    let service_type = get_cstring(buf, "service_type")?;
    let source_addr_ton = get_u8(buf, "source_addr_ton")?;
    let source_addr_npi = get_u8(buf, "source_addr_npi")?;
    let source_addr = get_cstring(buf, "source_addr")?;
    let dest_addr_ton = get_u8(buf, "dest_addr_ton")?;
    let dest_addr_npi = get_u8(buf, "dest_addr_npi")?;
    let destination_addr = get_cstring(buf, "destination_addr")?;
    let esm_class = get_u8(buf, "esm_class")?;
    let protocol_id = get_u8(buf, "protocol_id")?;
    let priority_flag = get_u8(buf, "priority_flag")?;
    let schedule_delivery_time = get_cstring(buf, "schedule_delivery_time")?;
    let validity_period = get_cstring(buf, "validity_period")?;
    let registered_delivery = get_u8(buf, "registered_delivery")?;
    let replace_if_present_flag = get_u8(buf, "replace_if_present_flag")?;
    let data_coding = get_u8(buf, "data_coding")?;
    let sm_default_msg_id = get_u8(buf, "sm_default_msg_id")?;
    let sm_length = get_u8(buf, "sm_length")? as usize;
    if buf.remaining() < sm_length {
        return Err(CodecError::Truncated("short_message"));
    }
    let short_message = buf.split_to(sm_length);
    let tlvs = decode_tlvs(buf)?;
    Ok(MessageFields {
        service_type,
        source_addr_ton,
        source_addr_npi,
        source_addr,
        dest_addr_ton,
        dest_addr_npi,
        destination_addr,
        esm_class,
        protocol_id,
        priority_flag,
        schedule_delivery_time,
        validity_period,
        registered_delivery,
        replace_if_present_flag,
        data_coding,
        sm_default_msg_id,
        short_message,
        tlvs,
    })
}

fn encode_message(m: &MessageFields, dst: &mut BytesMut) -> Result<(), CodecError> {
    if m.short_message.len() > MAX_SHORT_MESSAGE_LEN {
        return Err(CodecError::ShortMessageTooLong(m.short_message.len()));
    }
    put_cstring(dst, &m.service_type);
    dst.put_u8(m.source_addr_ton);
    dst.put_u8(m.source_addr_npi);
    put_cstring(dst, &m.source_addr);
    dst.put_u8(m.dest_addr_ton);
    dst.put_u8(m.dest_addr_npi);
    put_cstring(dst, &m.destination_addr);
    dst.put_u8(m.esm_class);
    dst.put_u8(m.protocol_id);
    dst.put_u8(m.priority_flag);
    put_cstring(dst, &m.schedule_delivery_time);
    put_cstring(dst, &m.validity_period);
    dst.put_u8(m.registered_delivery);
    dst.put_u8(m.replace_if_present_flag);
    dst.put_u8(m.data_coding);
    dst.put_u8(m.sm_default_msg_id);
    dst.put_u8(m.short_message.len() as u8);
    dst.put_slice(&m.short_message);
    for tlv in &m.tlvs {
        let len = u16::try_from(tlv.value.len())
            .map_err(|_| CodecError::TlvTooLong(tlv.value.len()))?;
        dst.put_u16(tlv.tag);
        dst.put_u16(len);
        dst.put_slice(&tlv.value);
    }
    Ok(())
}

fn decode_body(command_id: u32, mut buf: Bytes) -> Result<Body, CodecError> {
    let body = match command_id {
        GENERIC_NACK => Body::GenericNack,
        BIND_TRANSCEIVER => Body::BindTransceiver(decode_bind(&mut buf)?),
        BIND_TRANSCEIVER_RESP => Body::BindTransceiverResp {
            system_id: get_optional_cstring(&mut buf, "system_id")?,
        },
        SUBMIT_SM => Body::SubmitSm(decode_message(&mut buf)?),
        SUBMIT_SM_RESP => Body::SubmitSmResp {
            message_id: get_optional_cstring(&mut buf, "message_id")?,
        },
        DELIVER_SM => Body::DeliverSm(decode_message(&mut buf)?),
        DELIVER_SM_RESP => Body::DeliverSmResp {
            message_id: get_optional_cstring(&mut buf, "message_id")?,
        },
        UNBIND => Body::Unbind,
        UNBIND_RESP => Body::UnbindResp,
        ENQUIRE_LINK => Body::EnquireLink,
        ENQUIRE_LINK_RESP => Body::EnquireLinkResp,
        other => Body::Other {
            command_id: other,
            body: buf,
        },
    };
    Ok(body)
}

fn encode_body(body: &Body, dst: &mut BytesMut) -> Result<(), CodecError> {
    match body {
        Body::BindTransceiver(bind) => encode_bind(bind, dst),
        Body::BindTransceiverResp { system_id } => put_cstring(dst, system_id),
        Body::SubmitSm(m) | Body::DeliverSm(m) => encode_message(m, dst)?,
        Body::SubmitSmResp { message_id } | Body::DeliverSmResp { message_id } => {
            put_cstring(dst, message_id)
        }
        Body::Other { body, .. } => dst.put_slice(body),
        Body::GenericNack
        | Body::Unbind
        | Body::UnbindResp
        | Body::EnquireLink
        | Body::EnquireLinkResp => {}
    }
    Ok(())
}

/// Length-prefixed PDU framing for `tokio_util::codec::Framed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PduCodec;

impl Decoder for PduCodec {
    type Item = Pdu;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Pdu>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let frame_len = len as usize;
        if !(HEADER_LEN..=MAX_PDU_LEN).contains(&frame_len) {
            return Err(CodecError::InvalidLength(len));
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(frame_len).freeze();
        frame.advance(4);
        let command_id = frame.get_u32();
        let status = frame.get_u32();
        let sequence = frame.get_u32();
        let body = decode_body(command_id, frame)?;
        Ok(Some(Pdu {
            status,
            sequence,
            body,
        }))
    }
}

impl Encoder<Pdu> for PduCodec {
    type Error = CodecError;

    fn encode(&mut self, pdu: Pdu, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        encode_body(&pdu.body, &mut body)?;
        let len = HEADER_LEN + body.len();
        if len > MAX_PDU_LEN {
            return Err(CodecError::InvalidLength(len as u32));
        }
        dst.reserve(len);
        dst.put_u32(len as u32);
        dst.put_u32(pdu.command_id());
        dst.put_u32(pdu.status);
        dst.put_u32(pdu.sequence);
        dst.put_slice(&body);
        Ok(())
    }
}
