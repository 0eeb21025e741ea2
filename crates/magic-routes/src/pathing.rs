//! Path helpers shared by the build and the client library.

use url::Url;

/// Errors that can occur when resolving links.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// List every ancestor directory of `pathname`, shallowest first.
///
/// `/foo/bar/baz.html` yields `["/", "/foo/", "/foo/bar/"]`. The result has
/// one entry fewer than the number of `/`-separated segments, so an empty
/// string yields nothing.
pub fn ancestor_routes(pathname: &str) -> Vec<String> {
    let parts: Vec<&str> = pathname.split('/').collect();
    (1..parts.len())
        .map(|i| format!("{}/", parts[..i].join("/")))
        .collect()
}

/// Rewrite `url` as a path relative to `base`.
///
/// URLs on another host come back absolute and unchanged. An empty `url` resolves
/// to the base's own href.
pub fn relativize(url: &str, base: &Url) -> Result<String, RouteError> {
    if url.is_empty() {
        return Ok(base.to_string());
    }

    let target = base.join(url).map_err(|source| RouteError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    Ok(relativize_url(&target, base))
}

/// Infallible form of [`relativize`] for an already resolved target.
///
/// Only the host and explicit port are compared, so a target on the same host
/// under another scheme is still made relative.
pub fn relativize_url(target: &Url, base: &Url) -> String {
    if !same_host(target, base) {
        return target.to_string();
    }

    let base_segments: Vec<&str> = base.path().split('/').collect();
    let target_segments: Vec<&str> = target.path().split('/').collect();

    // `split` always yields at least one segment; the last is the file name.
    let base_dir = &base_segments[..base_segments.len() - 1];
    let (target_dir, target_file) = target_segments.split_at(target_segments.len() - 1);

    let common = base_dir
        .iter()
        .zip(target_dir)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; base_dir.len() - common];
    parts.extend_from_slice(&target_dir[common..]);
    parts.extend_from_slice(target_file);

    let mut relative = parts.join("/");
    if relative.is_empty() || parts[0].contains(':') {
        // A bare "" would resolve to the base document, and "a:b" to a scheme.
        relative.insert_str(0, "./");
    }

    if let Some(query) = target.query() {
        relative.push('?');
        relative.push_str(query);
    }
    if let Some(fragment) = target.fragment() {
        relative.push('#');
        relative.push_str(fragment);
    }

    relative
}

fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str().is_some() && a.host_str() == b.host_str() && a.port() == b.port()
}
