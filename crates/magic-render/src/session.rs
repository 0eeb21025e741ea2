//! Render session lifecycle and per-page builds.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use axum::middleware;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    RequestId, ResourceType,
};
use chromiumoxide::cdp::js_protocol::runtime::{ConsoleApiCalledType, EventConsoleApiCalled};
use chromiumoxide::{Browser, Page};
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use magic_routes::{Route, RouteError};
use magic_server::{static_site, transform_response};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use crate::html::{finish_document, pretty_print};
use crate::network::{wait_for_idle, NetworkEvent, NetworkTracker, IDLE_MAX_INFLIGHT};
use crate::options::RenderOptions;
use crate::page::{PageRenderResult, PageRenderer};
use crate::worker::{relative_rewrites, PrepareTransform, Worker};

/// Errors that can occur while starting, using or stopping a session.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Cannot {operation} a render session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Failed to start site server: {0}")]
    Server(String),

    #[error("Navigation to {route} failed: {message}")]
    Navigation { route: String, message: String },

    #[error("Timed out after {timeout_ms}ms loading {route}")]
    Timeout { route: String, timeout_ms: u128 },

    #[error("{route} responded with HTTP {status}")]
    Status { route: String, status: i64 },

    #[error("Worker page error: {0}")]
    Worker(String),

    #[error("Failed to format {route}: {message}")]
    Format { route: String, message: String },

    #[error(transparent)]
    Route(#[from] RouteError),
}

enum SessionState {
    Stopped,
    Starting,
    Running(Running),
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running(_) => "running",
        }
    }
}

/// Resources held while the session runs.
struct Running {
    browser: Browser,
    handler: JoinHandle<()>,
    worker: Worker,
    server: SiteServer,
}

impl Running {
    /// Release the browser, the worker page and the server, in that order.
    async fn shutdown(self) -> Result<(), RenderError> {
        let Running {
            mut browser,
            handler,
            worker,
            server,
        } = self;

        let mut result = Ok(());
        if let Err(e) = browser.close().await {
            result = Err(RenderError::Browser(format!("Failed to close browser: {}", e)));
        }
        if let Err(e) = browser.wait().await {
            tracing::debug!("Failed to wait for browser exit: {}", e);
        }
        handler.abort();
        drop(worker);

        if let Err(e) = server.shutdown().await {
            if result.is_ok() {
                result = Err(e);
            }
        }
        result
    }
}

/// HTTP server over the source tree, bound to an ephemeral local port.
struct SiteServer {
    base_url: Url,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl SiteServer {
    async fn bind(src_dir: &Path, lib_dir: &Path, worker: &Worker) -> Result<Self, RenderError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| RenderError::Server(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| RenderError::Server(e.to_string()))?;
        let base_url = Url::parse(&format!("http://{}/", addr))
            .map_err(|e| RenderError::Server(e.to_string()))?;

        let transform = Arc::new(PrepareTransform::new(worker.clone()));
        let app = static_site::<()>(src_dir, lib_dir).layer(middleware::from_fn_with_state(
            transform,
            transform_response::<PrepareTransform>,
        ));

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
        });

        Ok(Self {
            base_url,
            shutdown,
            task,
        })
    }

    async fn shutdown(self) -> Result<(), RenderError> {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RenderError::Server(e.to_string())),
            Err(e) => Err(RenderError::Server(e.to_string())),
        }
    }
}

/// A headless browser bound to a local server over one source tree.
///
/// `start` moves the session from stopped to running, `build` may then be
/// called any number of times (concurrently), and `stop` returns it to
/// stopped. Calls outside their valid state fail with
/// [`RenderError::InvalidState`].
pub struct RenderSession {
    options: RenderOptions,
    state: SessionState,
}

impl RenderSession {
    /// Create a stopped session.
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            state: SessionState::Stopped,
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running(_))
    }

    /// Base URL of the site server while running.
    pub fn base_url(&self) -> Option<&Url> {
        match &self.state {
            SessionState::Running(running) => Some(&running.server.base_url),
            _ => None,
        }
    }

    /// Launch the browser, open the worker page and start serving `src_dir`.
    ///
    /// On failure everything acquired so far is released and the session
    /// stays stopped.
    pub async fn start(&mut self, src_dir: &Path, lib_dir: &Path) -> Result<(), RenderError> {
        if !matches!(self.state, SessionState::Stopped) {
            return Err(self.invalid_state("start"));
        }

        self.state = SessionState::Starting;
        match self.launch(src_dir, lib_dir).await {
            Ok(running) => {
                tracing::debug!("Render session serving at {}", running.server.base_url);
                self.state = SessionState::Running(running);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Stopped;
                Err(e)
            }
        }
    }

    async fn launch(&self, src_dir: &Path, lib_dir: &Path) -> Result<Running, RenderError> {
        let config = self.options.browser_config().map_err(RenderError::Launch)?;
        let (mut browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser event error: {}", e);
                }
            }
        });

        let worker = match Worker::open(&browser).await {
            Ok(worker) => worker,
            Err(e) => {
                close_browser(&mut browser, handler).await;
                return Err(e);
            }
        };
        forward_console(worker.page(), "worker").await;

        let server = match SiteServer::bind(src_dir, lib_dir, &worker).await {
            Ok(server) => server,
            Err(e) => {
                drop(worker);
                close_browser(&mut browser, handler).await;
                return Err(e);
            }
        };

        Ok(Running {
            browser,
            handler,
            worker,
            server,
        })
    }

    /// Render `route` in a fresh page and finalize its HTML.
    pub async fn build(&self, route: &Route) -> Result<PageRenderResult, RenderError> {
        let running = match &self.state {
            SessionState::Running(running) => running,
            _ => return Err(self.invalid_state("build")),
        };

        let base_url = &running.server.base_url;
        let page_url = route.to_url(base_url)?;

        let page = running
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Browser(e.to_string()))?;

        let captured = self.capture(&page, route, &page_url, base_url).await;
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page for {}: {}", route, e);
        }
        let (raw, loaded) = captured?;

        let finalized = running.worker.finalize(&raw).await?;
        let linked: BTreeSet<Route> = finalized
            .linked_routes(&page_url, base_url)
            .into_iter()
            .collect();

        let mut content = finalized.content;
        if self.options.relative_links {
            let rewrites = relative_rewrites(&finalized.links, &page_url, base_url);
            content = running.worker.rewrite_links(&content, &rewrites).await?;
        }

        let content = pretty_print(&content).map_err(|message| RenderError::Format {
            route: route.to_string(),
            message,
        })?;

        Ok(PageRenderResult {
            route: route.clone(),
            content: finish_document(&content),
            loaded,
            linked,
        })
    }

    /// Navigate `page`, wait for the network to settle and read its HTML.
    async fn capture(
        &self,
        page: &Page,
        route: &Route,
        page_url: &Url,
        base_url: &Url,
    ) -> Result<(String, BTreeSet<Route>), RenderError> {
        let viewport = &self.options.viewport;
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(viewport.width))
            .height(i64::from(viewport.height))
            .device_scale_factor(viewport.scale)
            .mobile(false)
            .build()
            .map_err(RenderError::Browser)?;
        page.execute(metrics)
            .await
            .map_err(|e| RenderError::Browser(e.to_string()))?;

        let mut events = network_events(page).await?;
        forward_console(page, route.as_str()).await;

        let mut tracker = NetworkTracker::new(base_url.clone());
        let navigation = async {
            page.goto(page_url.as_str())
                .await
                .map_err(|e| RenderError::Navigation {
                    route: route.to_string(),
                    message: e.to_string(),
                })?;
            wait_for_idle(&mut events, &mut tracker, self.options.idle, IDLE_MAX_INFLIGHT).await;
            Ok::<(), RenderError>(())
        };

        tokio::time::timeout(self.options.timeout, navigation)
            .await
            .map_err(|_| RenderError::Timeout {
                route: route.to_string(),
                timeout_ms: self.options.timeout.as_millis(),
            })??;

        if let Some(status) = tracker.document_status() {
            if !(200..400).contains(&status) {
                return Err(RenderError::Status {
                    route: route.to_string(),
                    status,
                });
            }
        }

        let html = page
            .content()
            .await
            .map_err(|e| RenderError::Browser(e.to_string()))?;

        Ok((html, tracker.into_loaded()))
    }

    /// Close the browser, the worker page and the server.
    ///
    /// The session is stopped afterwards even if part of the teardown failed.
    pub async fn stop(&mut self) -> Result<(), RenderError> {
        match std::mem::replace(&mut self.state, SessionState::Stopped) {
            SessionState::Running(running) => running.shutdown().await,
            other => {
                self.state = other;
                Err(self.invalid_state("stop"))
            }
        }
    }

    fn invalid_state(&self, operation: &'static str) -> RenderError {
        RenderError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

impl PageRenderer for RenderSession {
    async fn render(&self, route: &Route) -> Result<PageRenderResult, RenderError> {
        self.build(route).await
    }
}

async fn close_browser(browser: &mut Browser, handler: JoinHandle<()>) {
    if let Err(e) = browser.close().await {
        tracing::debug!("Failed to close browser: {}", e);
    }
    let _ = browser.wait().await;
    handler.abort();
}

fn request_id(id: &RequestId) -> String {
    id.inner().clone()
}

/// Merge the request lifecycle events of `page` into one stream.
async fn network_events(
    page: &Page,
) -> Result<SelectAll<BoxStream<'static, NetworkEvent>>, RenderError> {
    let browser_error = |e: chromiumoxide::error::CdpError| RenderError::Browser(e.to_string());

    let requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(browser_error)?
        .map(|event| NetworkEvent::Request {
            id: request_id(&event.request_id),
            url: event.request.url.clone(),
        });
    let responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(browser_error)?
        .map(|event| NetworkEvent::Response {
            id: request_id(&event.request_id),
            url: event.response.url.clone(),
            status: event.response.status,
            document: event.r#type == ResourceType::Document,
        });
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(browser_error)?
        .map(|event| NetworkEvent::Finished {
            id: request_id(&event.request_id),
        });
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(browser_error)?
        .map(|event| NetworkEvent::Failed {
            id: request_id(&event.request_id),
        });

    Ok(stream::select_all([
        requests.boxed(),
        responses.boxed(),
        finished.boxed(),
        failed.boxed(),
    ]))
}

/// Log console output from `page`, labelled with `label`.
async fn forward_console(page: &Page, label: &str) {
    let mut messages = match page.event_listener::<EventConsoleApiCalled>().await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::debug!("Console output of {} unavailable: {}", label, e);
            return;
        }
    };

    let label = label.to_string();
    tokio::spawn(async move {
        while let Some(event) = messages.next().await {
            let text = event
                .args
                .iter()
                .map(|arg| match (&arg.value, &arg.description) {
                    (Some(serde_json::Value::String(s)), _) => s.clone(),
                    (Some(value), _) => value.to_string(),
                    (None, Some(description)) => description.clone(),
                    (None, None) => String::new(),
                })
                .collect::<Vec<_>>()
                .join(" ");

            match event.r#type {
                ConsoleApiCalledType::Error | ConsoleApiCalledType::Warning => {
                    tracing::warn!("{} console: {}", label, text)
                }
                _ => tracing::debug!("{} console: {}", label, text),
            }
        }
    });
}
