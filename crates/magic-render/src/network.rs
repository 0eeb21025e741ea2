//! Network activity tracking for a single page load.
//!
//! The browser reports request lifecycle events which are folded into a
//! [`NetworkTracker`]. A page counts as loaded once the number of in-flight
//! requests has stayed at or below a threshold for the idle window.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use futures::{Stream, StreamExt};
use magic_routes::Route;
use url::Url;

/// Default number of requests allowed in flight while idle.
pub const IDLE_MAX_INFLIGHT: usize = 0;

/// A request lifecycle event for one page.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A request was issued (or redirected)
    Request { id: String, url: String },

    /// Response headers arrived
    Response {
        id: String,
        url: String,
        status: i64,
        document: bool,
    },

    /// The request completed
    Finished { id: String },

    /// The request failed or was cancelled
    Failed { id: String },
}

/// Accumulated state of one page's network activity.
#[derive(Debug)]
pub struct NetworkTracker {
    base: Url,
    inflight: HashSet<String>,
    loaded: BTreeSet<Route>,
    document_status: Option<i64>,
}

impl NetworkTracker {
    /// Track activity for pages served from `base`.
    pub fn new(base: Url) -> Self {
        Self {
            base,
            inflight: HashSet::new(),
            loaded: BTreeSet::new(),
            document_status: None,
        }
    }

    pub fn apply(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Request { id, url } => {
                // data: and blob: URLs never produce a network connection.
                if url.starts_with("http:") || url.starts_with("https:") {
                    self.inflight.insert(id);
                }
            }
            NetworkEvent::Response {
                url,
                status,
                document,
                ..
            } => {
                if document && self.document_status.is_none() {
                    self.document_status = Some(status);
                }
                if (200..300).contains(&status) {
                    if let Some(route) = Url::parse(&url)
                        .ok()
                        .and_then(|url| Route::from_url(&url, &self.base))
                    {
                        self.loaded.insert(route);
                    }
                }
            }
            NetworkEvent::Finished { id } | NetworkEvent::Failed { id } => {
                self.inflight.remove(&id);
            }
        }
    }

    /// Number of requests currently in flight.
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Status of the first document response, if one was seen.
    pub fn document_status(&self) -> Option<i64> {
        self.document_status
    }

    /// Same-origin routes that were fetched successfully.
    pub fn loaded(&self) -> &BTreeSet<Route> {
        &self.loaded
    }

    pub fn into_loaded(self) -> BTreeSet<Route> {
        self.loaded
    }
}

/// Consume `events` until no more than `max_inflight` requests have been
/// pending for `idle`, or the stream ends.
pub async fn wait_for_idle<S>(
    events: &mut S,
    tracker: &mut NetworkTracker,
    idle: Duration,
    max_inflight: usize,
) where
    S: Stream<Item = NetworkEvent> + Unpin,
{
    loop {
        if tracker.inflight() <= max_inflight {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => tracker.apply(event),
                    None => return,
                },
                _ = tokio::time::sleep(idle) => return,
            }
        } else {
            match events.next().await {
                Some(event) => tracker.apply(event),
                None => return,
            }
        }
    }
}
