//! HTTP plumbing for minimal-magic.
//!
//! Serves a source tree with the shared library mounted at `/lib`, lets
//! callers rewrite HTML responses before they are sent, and runs the
//! development server with live reload.

pub mod reload;
pub mod server;
pub mod site;
pub mod transform;
pub mod watcher;

pub use reload::{next_message, reload_client_script, InjectReload, ReloadHub, ReloadMessage};
pub use server::{DevServer, DevServerConfig, ServerError};
pub use site::{is_page_path, static_site, LIB_PREFIX};
pub use transform::{transform_response, ResponseBuffer, ResponseTransform, TransformError};
pub use watcher::{FileWatcher, WatchEvent};
