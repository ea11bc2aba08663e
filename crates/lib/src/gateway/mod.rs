//! Gateway: HTTP submission endpoint plus the process wiring around it.
//!
//! `GET|POST /` with `src`, `dst`, `text` (query, urlencoded or multipart body) submits one short message through the shared
//! rate limiter and answers with the SMSC message id.

mod server;
mod status;
mod throttle;

pub use server::{router, run_bridge, serve_bridge, GatewayState};
pub use status::spawn_status_reporter;
pub use throttle::RateLimiter;
