//! Connection status reporter: logs every session status event until the stream closes.

use crate::smpp::ConnStatus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn spawn_status_reporter(status_rx: mpsc::UnboundedReceiver<ConnStatus>) -> JoinHandle<usize> {
    tokio::spawn(report_status(status_rx))
}

/// Returns how many events were seen.
async fn report_status(mut status_rx: mpsc::UnboundedReceiver<ConnStatus>) -> usize {
    let mut seen = 0;
    while let Some(status) = status_rx.recv().await {
        seen += 1;
        if status.is_failure() {
            log::warn!("SMPP connection status: {}", status);
        } else {
            log::info!("SMPP connection status: {}", status);
        }
    }
    log::debug!("SMPP status stream closed");
    seen
}
