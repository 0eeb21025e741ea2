//! The route type used for dependency tracking.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::pathing::RouteError;

/// Characters escaped in a path segment built from a file name.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// An absolute same-origin path such as `/a/b.html`.
///
/// Directory routes are stored in their canonical `/…/index.html` form so the
/// same file is never recorded under two names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route(String);

impl Route {
    /// Create a route from a path, adding the leading slash if missing.
    pub fn new(path: &str) -> Self {
        let mut route = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        if route.ends_with('/') {
            route.push_str("index.html");
        }
        Self(route)
    }

    /// Create the route for a file name relative to the site root.
    ///
    /// Each segment is percent-encoded, so `Route::from_name(n).name() == n`.
    pub fn from_name(name: &str) -> Self {
        let path = name
            .replace('\\', "/")
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self::new(&path)
    }

    /// The route of `url` if it is an http(s) URL on the same origin as `base`.
    ///
    /// Query string and fragment are dropped.
    pub fn from_url(url: &Url, base: &Url) -> Option<Self> {
        if !matches!(url.scheme(), "http" | "https") || url.origin() != base.origin() {
            return None;
        }
        Some(Self::new(url.path()))
    }

    /// Resolve a raw attribute value found on the page at `page_url`.
    pub fn resolve(raw: &str, page_url: &Url, base: &Url) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let url = page_url.join(raw).ok()?;
        Self::from_url(&url, base)
    }

    /// The route as a string, including the leading slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The file name relative to the site root.
    ///
    /// This is the manifest key: no leading slash, percent-decoded.
    pub fn name(&self) -> String {
        percent_decode_str(&self.0[1..])
            .decode_utf8_lossy()
            .into_owned()
    }

    /// The absolute URL of this route on `base`.
    pub fn to_url(&self, base: &Url) -> Result<Url, RouteError> {
        base.join(&self.0).map_err(|source| RouteError::InvalidUrl {
            url: self.0.clone(),
            source,
        })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Route {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://127.0.0.1:4321/").unwrap()
    }

    #[test]
    fn canonicalizes_directories() {
        assert_eq!(Route::new("/").as_str(), "/index.html");
        assert_eq!(Route::new("/docs/").as_str(), "/docs/index.html");
        assert_eq!(Route::new("about.html").as_str(), "/about.html");
    }

    #[test]
    fn names_have_no_leading_slash() {
        assert_eq!(Route::new("/a/b.html").name(), "a/b.html");
        assert_eq!(Route::from_name("a/b.html").as_str(), "/a/b.html");
    }

    #[test]
    fn file_names_survive_the_round_trip() {
        for name in [
            "index.html",
            "a%20b.html",
            "my photo.png",
            "docs/100%.html",
            "q?a#b.html",
            "caf\u{e9}/men\u{fc}.html",
        ] {
            assert_eq!(Route::from_name(name).name(), name, "{name}");
        }
        assert_eq!(Route::from_name("a%20b.html").as_str(), "/a%2520b.html");
        assert_eq!(Route::from_name("a b.html").as_str(), "/a%20b.html");
    }

    #[test]
    fn file_route_matches_the_served_url() {
        let route = Route::from_name("a b/c%d.html");
        let url = route.to_url(&base()).unwrap();
        assert_eq!(Route::from_url(&url, &base()), Some(route));
    }

    #[test]
    fn names_are_percent_decoded() {
        let page = base().join("/index.html").unwrap();
        let route = Route::resolve("my photo.png", &page, &base()).unwrap();
        assert_eq!(route.as_str(), "/my%20photo.png");
        assert_eq!(route.name(), "my photo.png");
    }

    #[test]
    fn resolves_relative_links_against_the_page() {
        let page = base().join("/blog/post.html").unwrap();

        let route = Route::resolve("../lib/dom.js", &page, &base()).unwrap();
        assert_eq!(route.as_str(), "/lib/dom.js");

        let route = Route::resolve("./", &page, &base()).unwrap();
        assert_eq!(route.as_str(), "/blog/index.html");

        let route = Route::resolve("img.png?v=3#x", &page, &base()).unwrap();
        assert_eq!(route.as_str(), "/blog/img.png");
    }

    #[test]
    fn ignores_foreign_links() {
        let page = base().join("/index.html").unwrap();
        for raw in [
            "https://example.com/x.html",
            "http://127.0.0.1:9999/x.html",
            "mailto:me@example.com",
            "data:image/png;base64,AAAA",
            "javascript:void(0)",
            "",
            "   ",
        ] {
            assert_eq!(Route::resolve(raw, &page, &base()), None, "{raw:?}");
        }
    }

    #[test]
    fn fragment_only_link_is_the_page_itself() {
        let page = base().join("/about.html").unwrap();
        let route = Route::resolve("#team", &page, &base()).unwrap();
        assert_eq!(route.as_str(), "/about.html");
    }
}
