//! HTTP provisioning portal.
//!
//! Serves the network selection form on `/index.html` and accepts the
//! submitted credential on `/results.html`. Uses `tiny_http`, which works on
//! both host and ESP32 (via std::net).
//!
//! # Routes
//!
//! | Method | Path            | Response                                  |
//! |--------|-----------------|-------------------------------------------|
//! | GET    | `/`             | 302 to `/index.html`                      |
//! | GET    | `/index.html`   | 200 form listing the scanned networks     |
//! | POST   | `/results.html` | 200 after the credential is stored        |
//!
//! A bad form or an invalid credential gets 400, a storage failure 500 and
//! a body that misses its deadline 408. A stored credential is announced to
//! the controller with [`ControllerEvent::CredentialsSaved`].
//!
//! Each request is handled on its own thread, so a client that stalls
//! mid-body holds up neither other clients nor [`ProvisioningPortal::stop`].
//! tiny_http exposes no socket timeout, so a stalled body is answered with
//! 408 once its read returns (more data arrives or the client half-closes).

pub mod form;
pub mod page;

pub use form::{parse_credential_form, percent_decode, CredentialForm, FormError};
pub use page::render_index;

use crate::controller::ControllerEvent;
use crate::storage::{CredentialStore, KeyValueStorage, StoreError};
use crate::wifi::ScanResult;
use log::{error, info, warn};
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Request, Response, Server};

pub const INDEX_PATH: &str = "/index.html";
pub const RESULTS_PATH: &str = "/results.html";

/// Default time a POST body has to arrive.
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounds on how much of a request body is read, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalLimits {
    /// Bytes of body kept; the rest is left unread.
    pub recv_buffer: usize,
    /// Deadline for the body, counted from when the handler starts reading.
    pub body_timeout: Duration,
}

impl Default for PortalLimits {
    fn default() -> Self {
        Self {
            recv_buffer: crate::config::DEFAULT_RECV_BUFFER_SIZE,
            body_timeout: DEFAULT_BODY_TIMEOUT,
        }
    }
}

/// Portal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    Stopped,
    Listening,
}

/// Response produced by [`route`], independent of the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
    pub location: Option<&'static str>,
    pub allow: Option<&'static str>,
}

impl PortalResponse {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            body,
            content_type: "text/html",
            location: None,
            allow: None,
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "text/plain",
            location: None,
            allow: None,
        }
    }

    fn method_not_allowed(allow: &'static str) -> Self {
        Self {
            allow: Some(allow),
            ..Self::text(405, "Method Not Allowed")
        }
    }
}

/// Everything a request handler needs.
pub struct PortalContext<S> {
    page: String,
    store: CredentialStore<S>,
    events: Sender<ControllerEvent>,
    limits: PortalLimits,
}

impl<S: KeyValueStorage> PortalContext<S> {
    /// Render the form for `networks` once; it is served unchanged until
    /// the portal stops.
    pub fn new(
        networks: &ScanResult,
        store: CredentialStore<S>,
        events: Sender<ControllerEvent>,
        limits: PortalLimits,
    ) -> Self {
        Self {
            page: render_index(networks),
            store,
            events,
            limits,
        }
    }

    fn save_credential(&self, body: &mut dyn Read) -> PortalResponse {
        let mut content = Vec::with_capacity(self.limits.recv_buffer);
        let mut body = DeadlineReader {
            inner: body,
            deadline: Instant::now() + self.limits.body_timeout,
        };
        // Anything past the receive buffer is left unread
        if let Err(e) = body
            .by_ref()
            .take(self.limits.recv_buffer as u64)
            .read_to_end(&mut content)
        {
            return match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    warn!("Timed out receiving form body");
                    PortalResponse::text(408, "Request Timeout")
                }
                _ => {
                    warn!("Failed to receive form body: {}", e);
                    PortalResponse::text(400, "Bad Request")
                }
            };
        }

        let form = match parse_credential_form(&content) {
            Ok(form) => form,
            Err(e) => {
                warn!("Malformed credential form: {}", e);
                return PortalResponse::text(400, "Bad Request");
            }
        };

        match self.store.set(&form.ssid, &form.passphrase) {
            Ok(()) => {
                info!("SSID '{}' and password saved. Restarting...", form.ssid);
                if self.events.send(ControllerEvent::CredentialsSaved).is_err() {
                    warn!("Controller is gone, credential saved without restart");
                }
                PortalResponse::html(200, page::SAVED_PAGE.to_string())
            }
            Err(StoreError::InvalidInput(e)) => {
                warn!("Rejected credential for '{}': {}", form.ssid, e);
                PortalResponse::text(400, "Bad Request")
            }
            Err(e) => {
                error!("Failed to save credential: {}", e);
                PortalResponse::text(500, "Internal Server Error")
            }
        }
    }
}

/// Body reader that fails with `TimedOut` once its deadline has passed.
struct DeadlineReader<R> {
    inner: R,
    deadline: Instant,
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if Instant::now() >= self.deadline {
            return Err(body_deadline_passed());
        }
        let n = self.inner.read(buf)?;
        // A read that blocked past the deadline is late even if it got data
        if Instant::now() >= self.deadline {
            return Err(body_deadline_passed());
        }
        Ok(n)
    }
}

fn body_deadline_passed() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "request body deadline passed")
}

/// Handle one request.
pub fn route<S: KeyValueStorage>(
    ctx: &PortalContext<S>,
    method: &Method,
    url: &str,
    body: &mut dyn Read,
) -> PortalResponse {
    let path = url.split('?').next().unwrap_or(url);

    match path {
        "/" => match method {
            Method::Get => PortalResponse {
                location: Some(INDEX_PATH),
                ..PortalResponse::text(302, "See /index.html")
            },
            _ => PortalResponse::method_not_allowed("GET"),
        },
        INDEX_PATH => match method {
            Method::Get => PortalResponse::html(200, ctx.page.clone()),
            _ => PortalResponse::method_not_allowed("GET"),
        },
        RESULTS_PATH => match method {
            Method::Post => ctx.save_credential(body),
            _ => PortalResponse::method_not_allowed("POST"),
        },
        _ => PortalResponse::text(404, "Not Found"),
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

/// The provisioning HTTP server.
///
/// Runs in a background thread until stopped or dropped.
pub struct ProvisioningPortal {
    /// Server thread handle.
    handle: Option<thread::JoinHandle<()>>,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl ProvisioningPortal {
    /// Start serving `networks` on `bind_addr:port` (0.0.0.0 when `None`).
    ///
    /// Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub fn start<S>(
        bind_addr: Option<IpAddr>,
        port: u16,
        networks: &ScanResult,
        store: CredentialStore<S>,
        events: Sender<ControllerEvent>,
        limits: PortalLimits,
    ) -> Result<Self, io::Error>
    where
        S: KeyValueStorage + 'static,
    {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let local_addr = server.server_addr().to_ip();

        info!(
            "Provisioning portal listening on http://{}{}",
            local_addr.map_or(addr, |a| a.to_string()),
            INDEX_PATH
        );

        let ctx = Arc::new(PortalContext::new(networks, store, events, limits));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, ctx, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    fn run_server<S: KeyValueStorage + 'static>(
        server: Server,
        ctx: Arc<PortalContext<S>>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Provisioning portal shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => {
                    let ctx = Arc::clone(&ctx);
                    let shutdown = Arc::clone(&shutdown);
                    let spawned = thread::Builder::new()
                        .name("portal-request".into())
                        .spawn(move || Self::handle_request(&ctx, request, &shutdown));
                    if let Err(e) = spawned {
                        // The request went down with the closure, tiny_http answers 500
                        error!("Failed to spawn portal request handler: {}", e);
                    }
                }
                Ok(None) => {
                    // Timeout, check shutdown flag and continue
                }
                Err(e) => {
                    error!("Portal server error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_request<S: KeyValueStorage>(
        ctx: &PortalContext<S>,
        mut request: Request,
        shutdown: &AtomicBool,
    ) {
        let method = request.method().clone();
        let url = request.url().to_string();
        let reply = if shutdown.load(Ordering::Acquire) {
            PortalResponse::text(503, "Service Unavailable")
        } else {
            route(ctx, &method, &url, request.as_reader())
        };

        let mut response = Response::from_string(reply.body).with_status_code(reply.status);
        if let Some(h) = header("Content-Type", reply.content_type) {
            response.add_header(h);
        }
        if let Some(h) = reply.location.and_then(|l| header("Location", l)) {
            response.add_header(h);
        }
        if let Some(h) = reply.allow.and_then(|a| header("Allow", a)) {
            response.add_header(h);
        }

        if let Err(e) = request.respond(response) {
            warn!("Failed to send {} response for {}: {}", reply.status, url, e);
        }
    }

    /// `Listening` while the server thread runs.
    pub fn state(&self) -> PortalState {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            PortalState::Listening
        } else {
            PortalState::Stopped
        }
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the server.
    ///
    /// May take up to 100ms due to the polling interval. Requests still in
    /// flight finish on their own threads and get 503 if not yet routed.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProvisioningPortal {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::mpsc::{self, Receiver};

    fn context() -> (
        PortalContext<MemoryStorage>,
        CredentialStore<MemoryStorage>,
        Receiver<ControllerEvent>,
    ) {
        let store = CredentialStore::new(MemoryStorage::new());
        let (tx, rx) = mpsc::channel();
        let networks = ScanResult::from_ssids(vec!["lab-iot".to_string()], 16);
        let ctx = PortalContext::new(&networks, store.clone(), tx, PortalLimits::default());
        (ctx, store, rx)
    }

    fn post(ctx: &PortalContext<MemoryStorage>, body: &[u8]) -> PortalResponse {
        let mut reader = body;
        route(ctx, &Method::Post, RESULTS_PATH, &mut reader)
    }

    fn get(ctx: &PortalContext<MemoryStorage>, url: &str) -> PortalResponse {
        route(ctx, &Method::Get, url, &mut io::empty())
    }

    struct TimingOutReader;

    impl Read for TimingOutReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "slow client"))
        }
    }

    /// Delivers the whole body, but only after `delay`.
    struct LateReader {
        body: &'static [u8],
        delay: Duration,
    }

    impl Read for LateReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(self.delay);
            self.body.read(buf)
        }
    }

    #[test]
    fn test_index_lists_scan() {
        let (ctx, _, _) = context();
        let reply = get(&ctx, INDEX_PATH);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, "text/html");
        assert!(reply.body.contains(r#"<option value="lab-iot">lab-iot</option>"#));
    }

    #[test]
    fn test_index_ignores_query() {
        let (ctx, _, _) = context();
        assert_eq!(get(&ctx, "/index.html?x=1").status, 200);
    }

    #[test]
    fn test_root_redirects() {
        let (ctx, _, _) = context();
        let reply = get(&ctx, "/");
        assert_eq!(reply.status, 302);
        assert_eq!(reply.location, Some(INDEX_PATH));
    }

    #[test]
    fn test_unknown_path() {
        let (ctx, _, _) = context();
        assert_eq!(get(&ctx, "/favicon.ico").status, 404);
    }

    #[test]
    fn test_wrong_methods() {
        let (ctx, _, _) = context();
        let reply = route(&ctx, &Method::Post, INDEX_PATH, &mut io::empty());
        assert_eq!(reply.status, 405);
        assert_eq!(reply.allow, Some("GET"));

        let reply = get(&ctx, RESULTS_PATH);
        assert_eq!(reply.status, 405);
        assert_eq!(reply.allow, Some("POST"));
    }

    #[test]
    fn test_post_saves_and_notifies() {
        let (ctx, store, rx) = context();
        let reply = post(&ctx, b"ssid=lab-iot&ipass=IoT-IoT-IoT");
        assert_eq!(reply.status, 200);

        let credential = store.get().unwrap();
        assert_eq!(credential.ssid(), "lab-iot");
        assert_eq!(credential.passphrase(), "IoT-IoT-IoT");
        assert_eq!(rx.try_recv(), Ok(ControllerEvent::CredentialsSaved));
    }

    #[test]
    fn test_post_malformed_leaves_store_unchanged() {
        let (ctx, store, rx) = context();
        let reply = post(&ctx, b"ssid=lab-iot");
        assert_eq!(reply.status, 400);
        assert_eq!(store.get(), Err(StoreError::NotFound));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_post_invalid_credential() {
        let (ctx, store, rx) = context();
        let long_ssid = "s".repeat(33);
        let body = format!("ssid={}&ipass=IoT-IoT-IoT", long_ssid);
        assert_eq!(post(&ctx, body.as_bytes()).status, 400);
        assert!(!store.is_configured());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_post_body_truncated_to_buffer() {
        let store = CredentialStore::new(MemoryStorage::new());
        let (tx, _rx) = mpsc::channel();
        let limits = PortalLimits {
            recv_buffer: 24,
            ..PortalLimits::default()
        };
        let ctx = PortalContext::new(&ScanResult::empty(), store.clone(), tx, limits);
        // Only "ssid=lab-iot&ipass=IoT-I" fits
        let reply = post(&ctx, b"ssid=lab-iot&ipass=IoT-IoT-IoT");
        assert_eq!(reply.status, 200);
        assert_eq!(store.get().unwrap().passphrase(), "IoT-I");
    }

    #[test]
    fn test_post_timeout() {
        let (ctx, store, _) = context();
        let reply = route(&ctx, &Method::Post, RESULTS_PATH, &mut TimingOutReader);
        assert_eq!(reply.status, 408);
        assert!(!store.is_configured());
    }

    #[test]
    fn test_post_body_past_deadline() {
        let store = CredentialStore::new(MemoryStorage::new());
        let (tx, rx) = mpsc::channel();
        let limits = PortalLimits {
            body_timeout: Duration::from_millis(20),
            ..PortalLimits::default()
        };
        let ctx = PortalContext::new(&ScanResult::empty(), store.clone(), tx, limits);

        let mut body = LateReader {
            body: b"ssid=lab-iot&ipass=IoT-IoT-IoT",
            delay: Duration::from_millis(60),
        };
        let reply = route(&ctx, &Method::Post, RESULTS_PATH, &mut body);
        assert_eq!(reply.status, 408);
        assert!(!store.is_configured());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_portal_start_stop() {
        let store = CredentialStore::new(MemoryStorage::new());
        let (tx, _rx) = mpsc::channel();
        let mut portal = ProvisioningPortal::start(
            Some(IpAddr::from([127, 0, 0, 1])),
            0,
            &ScanResult::empty(),
            store,
            tx,
            PortalLimits::default(),
        )
        .unwrap();
        assert_eq!(portal.state(), PortalState::Listening);
        assert!(portal.local_addr().unwrap().port() != 0);

        portal.stop();
        assert_eq!(portal.state(), PortalState::Stopped);
    }
}
