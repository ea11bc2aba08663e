//! Gateway HTTP server and bridge wiring (relay, session, status reporter, submission endpoint).

use crate::channels::{Relay, RelayBridge, TelegramRelay};
use crate::config::Config;
use crate::gateway::status::spawn_status_reporter;
use crate::gateway::throttle::RateLimiter;
use crate::smpp::pdu::FINAL_DELIVERY_RECEIPT;
use crate::smpp::{ShortMessage, SubmitError, Submitter, Transceiver};
use anyhow::{Context, Result};
use axum::{
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Sustained submissions per second and burst size for the shared limiter.
const SUBMIT_RATE: f64 = 10.0;
const SUBMIT_BURST: u32 = 1;

const NOT_CONNECTED_BODY: &str = "Oops.";

/// Shared state for the submission endpoint.
#[derive(Clone)]
pub struct GatewayState {
    pub submitter: Arc<dyn Submitter>,
    pub limiter: Arc<RateLimiter>,
}

impl GatewayState {
    pub fn new(submitter: Arc<dyn Submitter>) -> Self {
        Self {
            submitter,
            limiter: Arc::new(RateLimiter::new(SUBMIT_RATE, SUBMIT_BURST)),
        }
    }
}

/// Form values in arrival order. A repeated key is not an error; the first value wins.
#[derive(Debug, Default)]
struct FormFields(Vec<(String, String)>);

impl FormFields {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Body values take precedence over query values. Absent fields are submitted as empty
/// strings; validation is left to the SMSC.
fn short_message(body: &FormFields, query: &FormFields) -> ShortMessage {
    let field = |key: &str| {
        body.get(key)
            .or_else(|| query.get(key))
            .unwrap_or_default()
            .to_string()
    };
    ShortMessage {
        src: field("src"),
        dst: field("dst"),
        text: field("text"),
        register: FINAL_DELIVERY_RECEIPT,
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

/// Read urlencoded or multipart form fields from a POST body. Other content types carry no
/// fields. A form body that cannot be parsed is rejected rather than treated as empty.
async fn read_form(req: Request) -> Result<FormFields, Response> {
    if req.method() == Method::GET || req.method() == Method::HEAD {
        return Ok(FormFields::default());
    }
    let mime = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "application/x-www-form-urlencoded" => {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, &())
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            Ok(FormFields(pairs))
        }
        "multipart/form-data" => {
            let mut multipart = Multipart::from_request(req, &())
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            let mut pairs = Vec::new();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| bad_request(e.body_text()))?
            {
                let name = field.name().unwrap_or_default().to_string();
                let value = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                pairs.push((name, value));
            }
            Ok(FormFields(pairs))
        }
        _ => Ok(FormFields::default()),
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(submit_http).post(submit_http))
        .with_state(state)
}

/// GET|POST / — one rate-limited submit_sm per request; 200 with the message id,
/// 503 when the session is down, 400 with the error text otherwise.
async fn submit_http(
    State(state): State<GatewayState>,
    Query(query): Query<Vec<(String, String)>>,
    req: Request,
) -> Response {
    let body = match read_form(req).await {
        Ok(body) => body,
        Err(rejection) => return rejection,
    };
    let sm = short_message(&body, &FormFields(query));
    state.limiter.acquire().await;
    match state.submitter.submit(sm).await {
        Ok(message_id) => (StatusCode::OK, message_id).into_response(),
        Err(SubmitError::NotConnected) => {
            (StatusCode::SERVICE_UNAVAILABLE, NOT_CONNECTED_BODY).into_response()
        }
        Err(e) => {
            log::debug!("submit failed: {}", e);
            bad_request(e.to_string())
        }
    }
}

/// Run the bridge on an already bound listener until `shutdown` completes, then unbind the
/// session and wait for the status reporter to drain.
pub async fn serve_bridge<F>(config: Config, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let relay: Arc<dyn Relay> =
        Arc::new(TelegramRelay::new(&config).context("building telegram client")?);
    let bridge = Arc::new(RelayBridge::new(relay, config.verbosity()));
    let (session, status_rx) = Transceiver::from_config(&config, bridge).bind();
    let reporter = spawn_status_reporter(status_rx);

    let app = router(GatewayState::new(session.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited");

    session.close().await;
    if let Err(e) = reporter.await {
        log::warn!("status reporter failed: {}", e);
    }
    served?;
    log::info!("bridge stopped");
    Ok(())
}

/// Run the bridge: listen on `config.address`, bind the SMPP session and relay until
/// SIGINT/SIGTERM.
pub async fn run_bridge(config: Config) -> Result<()> {
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding to {}", config.address))?;
    log::info!("gateway listening on {}", config.address);
    serve_bridge(config, listener, shutdown_signal()).await
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, unbinding and stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Clone, Copy)]
    enum Outcome {
        Id,
        NotConnected,
        Rejected,
    }

    struct FakeSubmitter {
        outcome: Outcome,
        seen: Mutex<Vec<ShortMessage>>,
    }

    impl FakeSubmitter {
        fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Submitter for FakeSubmitter {
        async fn submit(&self, sm: ShortMessage) -> Result<String, SubmitError> {
            self.seen.lock().unwrap().push(sm);
            match self.outcome {
                Outcome::Id => Ok("42".to_string()),
                Outcome::NotConnected => Err(SubmitError::NotConnected),
                Outcome::Rejected => Err(SubmitError::Status(0x0B)),
            }
        }
    }

    fn post_form(body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn post_form_returns_message_id() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let resp = app.oneshot(post_form("src=A&dst=B&text=hi")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "42");
        let seen = fake.seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[ShortMessage {
                src: "A".into(),
                dst: "B".into(),
                text: "hi".into(),
                register: FINAL_DELIVERY_RECEIPT,
            }]
        );
    }

    #[tokio::test]
    async fn get_query_is_accepted() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let req = Request::builder()
            .uri("/?src=A&dst=B&text=hello%20there")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(fake.seen.lock().unwrap()[0].text, "hello there");
    }

    #[tokio::test]
    async fn missing_fields_submit_empty_strings() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen[0].src, "");
        assert_eq!(seen[0].dst, "");
        assert_eq!(seen[0].text, "");
    }

    #[tokio::test]
    async fn body_wins_over_query() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let req = Request::builder()
            .method(Method::POST)
            .uri("/?src=Q&dst=Q")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("src=F"))
            .unwrap();
        app.oneshot(req).await.unwrap();
        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen[0].src, "F");
        assert_eq!(seen[0].dst, "Q");
    }

    #[tokio::test]
    async fn multipart_body_is_accepted() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"src\"\r\n\r\nA\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"dst\"\r\n\r\nB\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"text\"\r\n\r\nhi there\r\n\
            --XYZ--\r\n";
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen[0].src, "A");
        assert_eq!(seen[0].dst, "B");
        assert_eq!(seen[0].text, "hi there");
    }

    #[tokio::test]
    async fn malformed_multipart_is_rejected_without_submitting() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let req = Request::builder()
            .method(Method::POST)
            .uri("/?src=A&dst=B&text=hi")
            .header(header::CONTENT_TYPE, "multipart/form-data")
            .body(Body::from("src=A"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(fake.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_body_key_takes_first_value() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let resp = app
            .oneshot(post_form("src=A&src=Z&dst=B&text=hi"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen[0].src, "A");
        assert_eq!(seen[0].dst, "B");
        assert_eq!(seen[0].text, "hi");
    }

    #[tokio::test]
    async fn repeated_query_key_takes_first_value() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let req = Request::builder()
            .uri("/?src=A&src=Z&dst=B&text=hi")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(fake.seen.lock().unwrap()[0].src, "A");
    }

    #[tokio::test]
    async fn not_connected_is_503() {
        let app = router(GatewayState::new(FakeSubmitter::new(Outcome::NotConnected)));
        let resp = app.oneshot(post_form("src=A&dst=B&text=hi")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(resp).await, NOT_CONNECTED_BODY);
    }

    #[tokio::test]
    async fn other_errors_are_400_with_message() {
        let app = router(GatewayState::new(FakeSubmitter::new(Outcome::Rejected)));
        let resp = app.oneshot(post_form("src=A&dst=bad&text=hi")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(resp).await,
            SubmitError::Status(0x0B).to_string()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_share_the_limiter() {
        let fake = FakeSubmitter::new(Outcome::Id);
        let app = router(GatewayState::new(fake.clone()));
        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            let resp = app.clone().oneshot(post_form("text=x")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(fake.seen.lock().unwrap().len(), 3);
    }
}
