//! SMPP error types.

use thiserror::Error;

/// Frame-level decode/encode failure. Fatal for the link that produced it.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid command_length {0}")]
    InvalidLength(u32),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("{0} is not NUL terminated")]
    Unterminated(&'static str),

    #[error("short_message of {0} bytes exceeds 254")]
    ShortMessageTooLong(usize),

    #[error("TLV value of {0} bytes exceeds 65535")]
    TlvTooLong(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a submit_sm did not produce a message id.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("not connected")]
    NotConnected,

    #[error("submit_sm rejected: {} ({:#010x})", status_label(.0), .0)]
    Status(u32),

    #[error("timed out waiting for submit_sm_resp")]
    Timeout,

    #[error("unexpected response to submit_sm: {0}")]
    UnexpectedResponse(String),

    #[error("message of {0} bytes is too long")]
    MessageTooLong(usize),
}

fn status_label(code: &u32) -> &'static str {
    status_name(*code)
}

/// Symbolic name for common SMPP 3.4 command_status values.
pub fn status_name(code: u32) -> &'static str {
    match code {
        0x0000_0000 => "ESME_ROK",
        0x0000_0001 => "ESME_RINVMSGLEN",
        0x0000_0002 => "ESME_RINVCMDLEN",
        0x0000_0003 => "ESME_RINVCMDID",
        0x0000_0004 => "ESME_RINVBNDSTS",
        0x0000_0005 => "ESME_RALYBND",
        0x0000_0008 => "ESME_RSYSERR",
        0x0000_000A => "ESME_RINVSRCADR",
        0x0000_000B => "ESME_RINVDSTADR",
        0x0000_000C => "ESME_RINVMSGID",
        0x0000_000D => "ESME_RBINDFAIL",
        0x0000_000E => "ESME_RINVPASWD",
        0x0000_000F => "ESME_RINVSYSID",
        0x0000_0014 => "ESME_RMSGQFUL",
        0x0000_0045 => "ESME_RSUBMITFAIL",
        0x0000_0058 => "ESME_RTHROTTLED",
        _ => "unknown status",
    }
}
