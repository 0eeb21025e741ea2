//! Live reload over a websocket.

use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::transform::{ResponseTransform, TransformError};

/// Websocket endpoint the client script connects to.
pub const RELOAD_SOCKET_PATH: &str = "/__reload";

/// Path of the client script.
pub const RELOAD_SCRIPT_PATH: &str = "/__reload.js";

/// Messages sent to connected pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Reload the page
    Reload,

    /// Connection established
    Connected,
}

/// Broadcasts reload messages to every connected page.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl ReloadHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Send a message to all connected pages.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers just means no page is open.
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Wait for the next message, skipping over any the receiver fell behind on.
///
/// Returns `None` once every sender is gone.
pub async fn next_message(rx: &mut broadcast::Receiver<ReloadMessage>) -> Option<ReloadMessage> {
    loop {
        match rx.recv().await {
            Ok(msg) => return Some(msg),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Reload subscriber skipped {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Adds the reload client script to served pages.
pub struct InjectReload;

impl ResponseTransform for InjectReload {
    async fn transform(
        &self,
        _path: String,
        body: Bytes,
    ) -> Result<Option<Bytes>, TransformError> {
        let html = String::from_utf8_lossy(&body);
        Ok(Some(inject_script_tag(&html).into()))
    }
}

/// Insert the client script tag before the last `</body>`, or append it.
fn inject_script_tag(html: &str) -> String {
    let tag = format!(r#"<script src="{}"></script>"#, RELOAD_SCRIPT_PATH);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => format!("{}{}\n{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}\n{}\n", html.trim_end(), tag),
    }
}

/// The client-side reload script.
///
/// Connects back to the serving host, so it works on any `--host`/`--port`.
pub fn reload_client_script() -> String {
    format!(
        r#"(function() {{
  'use strict';

  const protocol = location.protocol === 'https:' ? 'wss:' : 'ws:';
  let attempts = 0;

  function connect() {{
    const ws = new WebSocket(protocol + '//' + location.host + '{}');

    ws.onopen = function() {{
      attempts = 0;
    }};

    ws.onmessage = function(event) {{
      const msg = JSON.parse(event.data);
      if (msg.type === 'reload') {{
        location.reload();
      }}
    }};

    ws.onclose = function() {{
      if (attempts < 10) {{
        attempts++;
        setTimeout(connect, 500 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#,
        RELOAD_SOCKET_PATH
    )
}
