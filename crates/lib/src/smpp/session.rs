//! Persistent SMPP transceiver session.
//!
//! `Transceiver::bind` spawns a supervisor that connects, binds, keeps the link alive with
//! enquire_link and reconnects with backoff. Status changes are reported on a channel;
//! inbound requests are handed to an [`InboundHandler`]; submissions go through [`Submitter`].

use crate::config::Config;
use crate::smpp::error::SubmitError;
use crate::smpp::pdu::{
    Bind, Body, MessageFields, Pdu, PduCodec, Tlv, ALERT_NOTIFICATION, ESME_RINVCMDID,
    ESME_ROK, INTERFACE_VERSION, MAX_SHORT_MESSAGE_LEN, TAG_MESSAGE_PAYLOAD,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
const UNBIND_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_SEQUENCE: u32 = 0x7FFF_FFFF;
const BIND_SEQUENCE: u32 = 1;

/// Connection status reported by the session supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnStatus {
    Connected,
    Disconnected,
    ConnectionFailed(String),
    BindFailed(String),
}

impl ConnStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, ConnStatus::ConnectionFailed(_) | ConnStatus::BindFailed(_))
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnStatus::Connected => f.write_str("Connected"),
            ConnStatus::Disconnected => f.write_str("Disconnected"),
            ConnStatus::ConnectionFailed(reason) => write!(f, "Connection failed: {}", reason),
            ConnStatus::BindFailed(reason) => write!(f, "Bind failed: {}", reason),
        }
    }
}

/// Receives every inbound request PDU (deliver_sm and anything else the SMSC sends).
/// Called sequentially from the link's read loop, so it must not block.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, pdu: &Pdu);
}

impl<F> InboundHandler for F
where
    F: Fn(&Pdu) + Send + Sync,
{
    fn handle(&self, pdu: &Pdu) {
        self(pdu)
    }
}

/// Outbound short message as accepted by [`Submitter::submit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortMessage {
    pub src: String,
    pub dst: String,
    pub text: String,
    /// registered_delivery flags (see `pdu::FINAL_DELIVERY_RECEIPT`).
    pub register: u8,
}

impl ShortMessage {
    /// Build submit_sm fields. Texts over 254 bytes travel in message_payload.
    fn into_fields(self) -> Result<MessageFields, SubmitError> {
        let text = Bytes::from(self.text.into_bytes());
        let (short_message, tlvs) = if text.len() <= MAX_SHORT_MESSAGE_LEN {
            (text, Vec::new())
        } else if text.len() <= u16::MAX as usize {
            (
                Bytes::new(),
                vec![Tlv {
                    tag: TAG_MESSAGE_PAYLOAD,
                    value: text,
                }],
            )
        } else {
            return Err(SubmitError::MessageTooLong(text.len()));
        };
        Ok(MessageFields {
            source_addr: self.src,
            destination_addr: self.dst,
            registered_delivery: self.register,
            short_message,
            tlvs,
            ..Default::default()
        })
    }
}

/// Submits short messages over a session. Safe for concurrent callers.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Returns the SMSC message id.
    async fn submit(&self, sm: ShortMessage) -> Result<String, SubmitError>;
}

/// Session parameters. Consumed by [`Transceiver::bind`].
pub struct Transceiver {
    pub addr: String,
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub enquire_link: Duration,
    pub response_timeout: Duration,
    pub handler: Arc<dyn InboundHandler>,
}

impl Transceiver {
    pub fn from_config(config: &Config, handler: Arc<dyn InboundHandler>) -> Self {
        Self {
            addr: config.smpp.clone(),
            system_id: config.username.clone(),
            password: config.password.clone(),
            system_type: config.systemtype.clone(),
            enquire_link: config.enquire_link_interval(),
            response_timeout: RESPONSE_TIMEOUT,
            handler,
        }
    }

    /// Start the persistent session. Returns the shared session handle and the status stream,
    /// which closes once the session is shut down.
    pub fn bind(self) -> (Arc<SmppSession>, mpsc::UnboundedReceiver<ConnStatus>) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let session = Arc::new(SmppSession {
            link: RwLock::new(None),
            shutdown: CancellationToken::new(),
            response_timeout: self.response_timeout,
            supervisor: Mutex::new(None),
        });
        let handle = tokio::spawn(supervise(self, session.clone(), status_tx));
        // Freshly created, so the lock is never contended here.
        if let Ok(mut slot) = session.supervisor.try_lock() {
            *slot = Some(handle);
        }
        (session, status_rx)
    }
}

type Pending = Mutex<HashMap<u32, oneshot::Sender<Pdu>>>;

/// One bound TCP link. Replaced on every reconnect.
struct Link {
    outbound: mpsc::Sender<Pdu>,
    pending: Pending,
    sequence: AtomicU32,
    /// Set under the `pending` lock once the link is down; no waiter is registered after it.
    closed: AtomicBool,
}

impl Link {
    fn new(outbound: mpsc::Sender<Pdu>) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(BIND_SEQUENCE),
            closed: AtomicBool::new(false),
        }
    }

    /// Mark the link down and drop every waiter, failing in-flight requests with NotConnected.
    async fn close(&self) {
        let mut pending = self.pending.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
    }

    fn next_sequence(&self) -> u32 {
        let mut current = self.sequence.load(Ordering::SeqCst);
        loop {
            let next = if current >= MAX_SEQUENCE { 1 } else { current + 1 };
            match self.sequence.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Queue a PDU for the writer. A closed writer means the link is going down anyway.
    async fn send(&self, pdu: Pdu) {
        if self.outbound.send(pdu).await.is_err() {
            log::debug!("smpp: link writer closed, dropping outbound pdu");
        }
    }

    /// Send a request and wait for the response with the same sequence number.
    async fn request(&self, body: Body, timeout: Duration) -> Result<Pdu, SubmitError> {
        let sequence = self.next_sequence();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(SubmitError::NotConnected);
            }
            pending.insert(sequence, tx);
        }
        if self.outbound.send(Pdu::new(sequence, body)).await.is_err() {
            self.pending.lock().await.remove(&sequence);
            return Err(SubmitError::NotConnected);
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(pdu)) => Ok(pdu),
            // Sender dropped: the link went down while waiting.
            Ok(Err(_)) => Err(SubmitError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&sequence);
                Err(SubmitError::Timeout)
            }
        }
    }
}

/// Shared handle to the persistent session.
pub struct SmppSession {
    link: RwLock<Option<Arc<Link>>>,
    shutdown: CancellationToken,
    response_timeout: Duration,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SmppSession {
    #[cfg(test)]
    pub(crate) async fn is_bound(&self) -> bool {
        self.link.read().await.is_some()
    }

    /// Unbind and stop reconnecting. The status stream closes when this returns.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("smpp supervisor task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl Submitter for SmppSession {
    async fn submit(&self, sm: ShortMessage) -> Result<String, SubmitError> {
        let link = self
            .link
            .read()
            .await
            .clone()
            .ok_or(SubmitError::NotConnected)?;
        let fields = sm.into_fields()?;
        let resp = link
            .request(Body::SubmitSm(fields), self.response_timeout)
            .await?;
        if resp.status != ESME_ROK {
            return Err(SubmitError::Status(resp.status));
        }
        match resp.body {
            Body::SubmitSmResp { message_id } => Ok(message_id),
            _ => Err(SubmitError::UnexpectedResponse(resp.name().to_string())),
        }
    }
}

/// Sleep unless shutdown is requested first. Returns false on shutdown.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn supervise(
    transceiver: Transceiver,
    session: Arc<SmppSession>,
    status_tx: mpsc::UnboundedSender<ConnStatus>,
) {
    let report = |status: ConnStatus| {
        let _ = status_tx.send(status);
    };
    let mut delay = RECONNECT_MIN;
    while !session.shutdown.is_cancelled() {
        let connected = tokio::select! {
            _ = session.shutdown.cancelled() => break,
            r = TcpStream::connect(&transceiver.addr) => r,
        };
        let stream = match connected {
            Ok(s) => s,
            Err(e) => {
                report(ConnStatus::ConnectionFailed(e.to_string()));
                if !pause(&session.shutdown, delay).await {
                    break;
                }
                delay = (delay * 2).min(RECONNECT_MAX);
                continue;
            }
        };
        let mut framed = Framed::new(stream, PduCodec);
        let bound = tokio::select! {
            _ = session.shutdown.cancelled() => break,
            r = bind(&mut framed, &transceiver, BIND_SEQUENCE) => r,
        };
        if let Err(reason) = bound {
            report(ConnStatus::BindFailed(reason));
            if !pause(&session.shutdown, delay).await {
                break;
            }
            delay = (delay * 2).min(RECONNECT_MAX);
            continue;
        }
        delay = RECONNECT_MIN;

        let (mut sink, stream) = framed.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Pdu>(64);
        let link = Arc::new(Link::new(out_tx));
        let writer = tokio::spawn(async move {
            while let Some(pdu) = out_rx.recv().await {
                if let Err(e) = sink.send(pdu).await {
                    log::debug!("smpp write failed: {}", e);
                    break;
                }
            }
        });
        *session.link.write().await = Some(link.clone());
        report(ConnStatus::Connected);

        let reason = run_link(stream, link, &transceiver, &session).await;
        *session.link.write().await = None;
        if tokio::time::timeout(UNBIND_TIMEOUT, writer).await.is_err() {
            log::debug!("smpp writer did not drain in time");
        }
        log::debug!("smpp link ended: {}", reason);
        report(ConnStatus::Disconnected);
        if !pause(&session.shutdown, delay).await {
            break;
        }
    }
    log::debug!("smpp session supervisor stopped");
}

async fn bind(
    framed: &mut Framed<TcpStream, PduCodec>,
    transceiver: &Transceiver,
    sequence: u32,
) -> Result<(), String> {
    let request = Pdu::new(
        sequence,
        Body::BindTransceiver(Bind {
            system_id: transceiver.system_id.clone(),
            password: transceiver.password.clone(),
            system_type: transceiver.system_type.clone(),
            interface_version: INTERFACE_VERSION,
            ..Default::default()
        }),
    );
    framed.send(request).await.map_err(|e| e.to_string())?;

    let wait_resp = async {
        loop {
            match framed.next().await {
                None => return Err("connection closed during bind".to_string()),
                Some(Err(e)) => return Err(e.to_string()),
                Some(Ok(pdu)) => match pdu.body {
                    Body::BindTransceiverResp { .. } | Body::GenericNack
                        if pdu.sequence == sequence =>
                    {
                        return Ok(pdu)
                    }
                    _ => log::debug!("smpp: ignoring {} while binding", pdu.name()),
                },
            }
        }
    };
    let resp = tokio::time::timeout(transceiver.response_timeout, wait_resp)
        .await
        .map_err(|_| "timed out waiting for bind_transceiver_resp".to_string())??;
    if resp.status != ESME_ROK {
        return Err(format!(
            "{} ({:#010x})",
            crate::smpp::error::status_name(resp.status),
            resp.status
        ));
    }
    if !matches!(resp.body, Body::BindTransceiverResp { .. }) {
        return Err(format!("unexpected {} to bind", resp.name()));
    }
    Ok(())
}

/// Serve a bound link until it drops, the peer unbinds, keep-alive fails or shutdown is
/// requested. Returns why it ended.
async fn run_link(
    mut stream: SplitStream<Framed<TcpStream, PduCodec>>,
    link: Arc<Link>,
    transceiver: &Transceiver,
    session: &SmppSession,
) -> String {
    let interval = transceiver.enquire_link;
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    let mut last_seen = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = session.shutdown.cancelled() => {
                // Out of service before unbinding so new submits fail fast.
                *session.link.write().await = None;
                let sequence = link.next_sequence();
                link.send(Pdu::new(sequence, Body::Unbind)).await;
                let wait_resp = async {
                    while let Some(Ok(pdu)) = stream.next().await {
                        if pdu.body == Body::UnbindResp && pdu.sequence == sequence {
                            break;
                        }
                    }
                };
                if tokio::time::timeout(UNBIND_TIMEOUT, wait_resp).await.is_err() {
                    log::debug!("smpp: no unbind_resp before shutdown");
                }
                break "shutdown".to_string();
            }
            _ = ticker.tick() => {
                if last_seen.elapsed() > interval * 3 {
                    break "keep-alive timeout".to_string();
                }
                link.send(Pdu::new(link.next_sequence(), Body::EnquireLink)).await;
            }
            frame = stream.next() => {
                let pdu = match frame {
                    None => break "connection closed by peer".to_string(),
                    Some(Err(e)) => break format!("read error: {}", e),
                    Some(Ok(pdu)) => pdu,
                };
                last_seen = Instant::now();
                if pdu.is_response() {
                    let waiter = link.pending.lock().await.remove(&pdu.sequence);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(pdu);
                        }
                        None if pdu.body == Body::EnquireLinkResp => {}
                        None => log::debug!("smpp: unsolicited {} seq {}", pdu.name(), pdu.sequence),
                    }
                    continue;
                }
                let sequence = pdu.sequence;
                match pdu.body {
                    Body::EnquireLink => link.send(Pdu::new(sequence, Body::EnquireLinkResp)).await,
                    Body::Unbind => {
                        link.send(Pdu::new(sequence, Body::UnbindResp)).await;
                        break "unbind requested by peer".to_string();
                    }
                    Body::DeliverSm(_) => {
                        transceiver.handler.handle(&pdu);
                        let resp = Body::DeliverSmResp {
                            message_id: String::new(),
                        };
                        link.send(Pdu::new(sequence, resp)).await;
                    }
                    // alert_notification has no response PDU.
                    Body::Other { command_id: ALERT_NOTIFICATION, .. } => {
                        transceiver.handler.handle(&pdu)
                    }
                    _ => {
                        transceiver.handler.handle(&pdu);
                        link.send(Pdu::with_status(ESME_RINVCMDID, sequence, Body::GenericNack)).await;
                    }
                }
            }
        }
    };

    link.close().await;
    reason
}
