//! smsbridge core library: SMPP session, inbound relay to Telegram, and the HTTP
//! submission gateway. Used by the `smsbridge` CLI.

pub mod channels;
pub mod coding;
pub mod config;
pub mod gateway;
pub mod init;
pub mod smpp;
