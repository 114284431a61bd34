use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::client::connection::Connector;
use crate::client::queue::RequestQueue;
use crate::client::task::ClientTask;
use crate::constants::defaults;
use crate::decode::DecodeLevel;
use crate::error::{ErrorCode, RequestError};
use crate::tcp::client::TcpConnector;
use crate::tcp::frame::constants::MAX_PAYLOAD_LENGTH;
use crate::tcp::frame::{check_server_and_function, ServerFunctionCheck};

pub use message::{DataHandler, ErrorHandler, Request, Response};
pub use target::Target;

pub(crate) mod message;
pub(crate) mod target;

pub(crate) mod connection;
pub(crate) mod queue;
pub(crate) mod task;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(0);

/// state shared between the client handle and its worker
pub(crate) struct Shared {
    pub(crate) queue: RequestQueue,
    settings: Mutex<Settings>,
}

struct Settings {
    target: Target,
    last_used: Option<Target>,
    default_timeout: Duration,
    default_interval: Duration,
    check: ServerFunctionCheck,
    decode: DecodeLevel,
    on_data: Option<DataHandler>,
    on_error: Option<ErrorHandler>,
}

impl Shared {
    fn new(queue_limit: usize, target: Target) -> Self {
        Self {
            queue: RequestQueue::new(queue_limit),
            settings: Mutex::new(Settings {
                target,
                last_used: None,
                default_timeout: defaults::RESPONSE_TIMEOUT,
                default_interval: defaults::TARGET_INTERVAL,
                check: check_server_and_function,
                decode: DecodeLevel::default(),
                on_data: None,
                on_error: None,
            }),
        }
    }

    pub(crate) fn decode_level(&self) -> DecodeLevel {
        self.settings().decode
    }

    /// handlers are cloned out so that they never run while the lock is held
    pub(crate) fn handlers(&self) -> (Option<DataHandler>, Option<ErrorHandler>) {
        let settings = self.settings();
        (settings.on_data.clone(), settings.on_error.clone())
    }

    pub(crate) fn set_last_used(&self, target: &Target) {
        self.settings().last_used = Some(target.clone());
    }

    fn settings(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a Modbus TCP client
///
/// Requests are queued by the handle and processed one at a time, in the order they were
/// queued, by a worker task spawned with [`ClientTcp::start`]. The worker owns the single
/// connection of the client: it reconnects when the target changes, paces consecutive
/// requests to the same target and retries timeouts and connection failures.
///
/// Outcomes of requests queued with a token are reported through the handlers registered
/// with [`ClientTcp::on_data`] and [`ClientTcp::on_error`]. Outcomes of [`ClientTcp::request`]
/// are returned to the caller instead.
///
/// Dropping the handle stops the worker and discards every queued request.
pub struct ClientTcp {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl ClientTcp {
    /// Create a client whose default target is `0.0.0.0:0`
    ///
    /// A target must be set with [`ClientTcp::set_target`] before requests can succeed.
    ///
    /// * `queue_limit` - maximum number of requests that may be queued, including the one in flight
    pub fn new(queue_limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared::new(queue_limit, Target::default())),
            task: None,
        }
    }

    /// Create a client with a default target using the default timeout and interval
    ///
    /// * `host` - host name or IP address of the server
    /// * `port` - TCP port of the server
    /// * `queue_limit` - maximum number of requests that may be queued, including the one in flight
    pub fn with_target(host: impl Into<String>, port: u16, queue_limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared::new(queue_limit, Target::new(host, port))),
            task: None,
        }
    }

    /// Set the timeout and interval applied by later calls to [`ClientTcp::set_target`]
    /// that leave them unspecified
    pub fn set_default_timeout(&self, timeout: Duration, interval: Duration) {
        let mut settings = self.shared.settings();
        settings.default_timeout = timeout;
        settings.default_interval = interval;
    }

    /// Change the target of the requests queued from now on
    ///
    /// A `timeout` or `interval` that is `None` or zero is replaced by the client default.
    /// Requests already in the queue keep the target they were queued with.
    ///
    /// Returns `true` if the host or port differ from the target of the last completed
    /// exchange, meaning the worker will reconnect.
    pub fn set_target(
        &self,
        host: impl Into<String>,
        port: u16,
        timeout: Option<Duration>,
        interval: Option<Duration>,
    ) -> bool {
        let mut settings = self.shared.settings();
        let timeout = timeout
            .filter(|x| !x.is_zero())
            .unwrap_or(settings.default_timeout);
        let interval = interval
            .filter(|x| !x.is_zero())
            .unwrap_or(settings.default_interval);

        let target = Target::new(host, port)
            .with_timeout(timeout)
            .with_interval(interval);

        let changed = settings
            .last_used
            .as_ref()
            .map(|last| !last.same_endpoint(&target))
            .unwrap_or(true);

        tracing::debug!("target set to {}", target);
        settings.target = target;
        changed
    }

    /// the target that requests queued now are sent to
    pub fn target(&self) -> Target {
        self.shared.settings().target.clone()
    }

    /// Replace the check applied by [`ClientTcp::add_request`] and [`ClientTcp::request`]
    pub fn set_check(&self, check: ServerFunctionCheck) {
        self.shared.settings().check = check;
    }

    /// Change the logging of frames and raw bytes, taking effect on the next request
    pub fn set_decode_level(&self, level: DecodeLevel) {
        self.shared.settings().decode = level;
    }

    /// Register the handler invoked for every request with a token that completes successfully
    pub fn on_data<F>(&self, handler: F)
    where
        F: Fn(u8, u8, &[u8], u32) + Send + Sync + 'static,
    {
        self.shared.settings().on_data = Some(Arc::new(handler));
    }

    /// Register the handler invoked for every request with a token that fails
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(ErrorCode, u32) + Send + Sync + 'static,
    {
        self.shared.settings().on_error = Some(Arc::new(handler));
    }

    /// Queue a request for the current target
    ///
    /// The request is handed back if the queue is full. This never blocks.
    pub fn enqueue(&self, request: Request) -> Result<(), Request> {
        let target = self.target();
        self.shared.queue.push(request, target).map_err(|request| {
            tracing::warn!(
                "queue full ({} requests), rejected request",
                self.shared.queue.limit()
            );
            request
        })
    }

    /// Validate and queue a request whose outcome is reported to the handlers with `token`
    ///
    /// Returns the error of the server/function check, [`ErrorCode::PacketLengthError`] if the
    /// payload cannot fit in a frame, or [`ErrorCode::RequestQueueFull`].
    pub fn add_request(
        &self,
        server_id: u8,
        function_code: u8,
        payload: Vec<u8>,
        token: u32,
    ) -> Result<(), ErrorCode> {
        self.preflight(server_id, function_code, &payload)?;
        self.enqueue(Request::new(server_id, function_code, payload, token))
            .map_err(|_| ErrorCode::RequestQueueFull)
    }

    /// Validate and queue a request, then wait for its outcome
    ///
    /// The handlers are not invoked for this request. The future only resolves once the
    /// worker has processed the request, so the client must have been started.
    pub async fn request(
        &self,
        server_id: u8,
        function_code: u8,
        payload: Vec<u8>,
    ) -> Result<Response, RequestError> {
        self.preflight(server_id, function_code, &payload)?;
        let (request, rx) = Request::with_promise(server_id, function_code, payload);
        if self.enqueue(request).is_err() {
            return Err(ErrorCode::RequestQueueFull.into());
        }
        rx.await.unwrap_or(Err(RequestError::Shutdown))
    }

    /// number of queued requests, including the one being processed
    pub fn pending_requests(&self) -> usize {
        self.shared.queue.len()
    }

    /// Discard every queued request except the one being processed, returning how many were removed
    pub fn clear_queue(&self) -> usize {
        let count = self.shared.queue.clear();
        if count > 0 {
            tracing::info!("cleared {} queued requests", count);
        }
        count
    }

    /// Spawn the worker onto the current tokio runtime
    ///
    /// Must be called from within a runtime. Calling it again has no effect.
    pub fn start(&mut self) {
        self.spawn(TcpConnector, None);
    }

    /// Spawn the worker onto the runtime of `handle`
    pub fn start_on(&mut self, handle: &tokio::runtime::Handle) {
        self.spawn(TcpConnector, Some(handle));
    }

    pub(crate) fn spawn<C: Connector>(
        &mut self,
        connector: C,
        runtime: Option<&tokio::runtime::Handle>,
    ) {
        if self.task.is_some() {
            tracing::warn!("client already started");
            return;
        }

        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let mut task = ClientTask::new(self.shared.clone(), connector);
        let worker =
            async move { task.run().await }.instrument(tracing::info_span!("Modbus-TCP", id = id));

        self.task = Some(match runtime {
            Some(runtime) => runtime.spawn(worker),
            None => tokio::spawn(worker),
        });
    }

    fn preflight(&self, server_id: u8, function_code: u8, payload: &[u8]) -> Result<(), ErrorCode> {
        let check = self.shared.settings().check;
        match check(server_id, function_code) {
            ErrorCode::Success => {}
            err => {
                tracing::warn!(
                    "rejected request for server {} function {:#04X}: {}",
                    server_id,
                    function_code,
                    err
                );
                return Err(err);
            }
        }

        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(ErrorCode::PacketLengthError);
        }

        Ok(())
    }
}

impl Drop for ClientTcp {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.shared.queue.clear();
    }
}
