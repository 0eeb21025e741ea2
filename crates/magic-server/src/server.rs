//! Development server implementation.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};

use crate::reload::{
    next_message, reload_client_script, InjectReload, ReloadHub, ReloadMessage,
    RELOAD_SCRIPT_PATH, RELOAD_SOCKET_PATH,
};
use crate::site::static_site;
use crate::transform::transform_response;
use crate::watcher::{FileWatcher, WatchEvent};

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Site source directory
    pub src_dir: PathBuf,

    /// Shared library directory served at `/lib`
    pub lib_dir: PathBuf,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Open browser on start
    pub open: bool,

    /// Inject the reload script and watch for changes
    pub live_reload: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from("src"),
            lib_dir: PathBuf::from("lib"),
            host: "localhost".to_string(),
            port: 8080,
            open: false,
            live_reload: true,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {0}: {1}")]
    BindError(String, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error("Server error: {0}")]
    ServeError(String),
}

/// Development server.
pub struct DevServer {
    config: DevServerConfig,
}

impl DevServer {
    /// Create a new development server.
    pub fn new(config: DevServerConfig) -> Self {
        Self { config }
    }

    /// Build the router without binding it.
    pub fn router(&self, hub: ReloadHub) -> Router {
        let site = static_site(&self.config.src_dir, &self.config.lib_dir);
        if !self.config.live_reload {
            return site;
        }

        Router::new()
            .route(RELOAD_SOCKET_PATH, get(ws_handler))
            .route(RELOAD_SCRIPT_PATH, get(reload_script_handler))
            .with_state(hub)
            .merge(site)
            .layer(middleware::from_fn_with_state(
                Arc::new(InjectReload),
                transform_response::<InjectReload>,
            ))
    }

    /// Start the development server. Runs until the process is stopped.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let hub = ReloadHub::new();

        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ServerError::BindError(addr.clone(), e.to_string()))?;

        // Keep the watcher alive for as long as the server runs.
        let _watcher = if self.config.live_reload {
            let watch_paths = vec![self.config.src_dir.clone(), self.config.lib_dir.clone()];
            let (watcher, mut rx) = FileWatcher::new(&watch_paths)
                .map_err(|e| ServerError::WatchError(e.to_string()))?;

            let reload_hub = hub.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    handle_watch_event(&reload_hub, event);
                }
            });
            Some(watcher)
        } else {
            None
        };

        let app = self.router(hub);
        let url = format!("http://{}/", addr);

        tracing::info!(
            "Serving {} at {} (library at /lib)",
            self.config.src_dir.display(),
            url
        );

        if self.config.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        Ok(())
    }
}

fn handle_watch_event(hub: &ReloadHub, event: WatchEvent) {
    tracing::info!("Changed: {}", event.path().display());
    hub.send(ReloadMessage::Reload);
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<ReloadHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, hub))
}

async fn handle_ws(mut socket: WebSocket, hub: ReloadHub) {
    let mut rx = hub.subscribe();

    if send_message(&mut socket, &ReloadMessage::Connected)
        .await
        .is_err()
    {
        return;
    }

    while let Some(msg) = next_message(&mut rx).await {
        if send_message(&mut socket, &msg).await.is_err() {
            break;
        }
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|e| {
        tracing::warn!("Failed to encode reload message: {}", e);
    })?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

async fn reload_script_handler() -> impl IntoResponse {
    (
        [("content-type", "application/javascript")],
        reload_client_script(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn creates_server_with_default_config() {
        let server = DevServer::new(DevServerConfig::default());
        assert_eq!(server.config.port, 8080);
        assert_eq!(server.config.host, "localhost");
        assert!(server.config.live_reload);
    }

    #[tokio::test]
    async fn serves_pages_with_reload_script() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let lib = temp.path().join("lib");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&lib).unwrap();
        fs::write(src.join("index.html"), "<html><body>hi</body></html>").unwrap();
        fs::write(lib.join("dom.js"), "export {};").unwrap();

        let server = DevServer::new(DevServerConfig {
            src_dir: src,
            lib_dir: lib,
            ..Default::default()
        });
        let app = server.router(ReloadHub::new());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let page = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(page.contains(r#"<script src="/__reload.js"></script>"#));

        let script = reqwest::get(format!("http://{}/lib/dom.js", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(script, "export {};");

        let client = reqwest::get(format!("http://{}/__reload.js", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(client.contains("WebSocket"));
    }
}
