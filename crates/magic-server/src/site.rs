//! Static serving of a source tree with the shared library mounted.

use std::path::Path;

use axum::Router;
use tower_http::services::ServeDir;

/// Mount point of the shared client library.
pub const LIB_PREFIX: &str = "/lib";

/// Whether a request path addresses a page: a directory or an `.html` file.
pub fn is_page_path(path: &str) -> bool {
    path.ends_with('/') || path.ends_with(".html")
}

/// Router serving `src_dir`, with `lib_dir` at [`LIB_PREFIX`].
///
/// The library mount takes precedence over any `lib/` directory in the source.
pub fn static_site<S>(src_dir: &Path, lib_dir: &Path) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .nest_service(LIB_PREFIX, ServeDir::new(lib_dir))
        .fallback_service(ServeDir::new(src_dir))
}
