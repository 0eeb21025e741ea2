//! The worker page: stateless document transforms evaluated in Chromium.
//!
//! Every call ships a document string into an `about:blank` page, parses it
//! with the browser's own `DOMParser`, and returns serializable results. The
//! worker page is never navigated and keeps no state between calls, so calls
//! from concurrent page builds may interleave freely.

use std::collections::BTreeMap;

use axum::body::Bytes;
use chromiumoxide::{Browser, Page};
use magic_routes::{pathing::relativize_url, Route};
use magic_server::{ResponseTransform, TransformError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::RenderError;

/// Attribute marking elements that only exist at build time.
pub const BUILD_MARKER: &str = "data-build";

/// Type given to disabled scripts; the original type follows the `=`.
pub const DISABLED_SCRIPT_PREFIX: &str = "text/plain;real-type=";

/// Disable every client-side script that is not marked for the build.
const PREPARE_SCRIPT: &str = r#"(function (content) {
  const doc = new DOMParser().parseFromString(content, "text/html");
  for (const script of doc.querySelectorAll("script")) {
    if (script.hasAttribute("data-build")) {
      continue;
    }
    const type = script.getAttribute("type") || "";
    if (!type || type === "text/javascript" || type === "module") {
      script.setAttribute("type", "text/plain;real-type=" + type);
    }
  }
  const doctype = doc.doctype ? "<!DOCTYPE " + doc.doctype.name + ">\n" : "";
  return doctype + doc.documentElement.outerHTML;
})"#;

/// Strip build-only elements, re-enable scripts and list link targets.
const FINALIZE_SCRIPT: &str = r#"(function (content) {
  const doc = new DOMParser().parseFromString(content, "text/html");

  for (const element of doc.querySelectorAll("[data-build]")) {
    const prev = element.previousSibling;
    if (prev && prev.nodeType === Node.TEXT_NODE) {
      prev.textContent = prev.textContent.replace(/[ \t]*$/, "");
    }
    const next = element.nextSibling;
    if (next && next.nodeType === Node.TEXT_NODE) {
      next.textContent = next.textContent.replace(/^[ \t]*\n/, "");
    }
    element.remove();
  }

  const prefix = "text/plain;real-type=";
  for (const script of doc.querySelectorAll("script")) {
    const type = script.getAttribute("type") || "";
    if (type.startsWith(prefix)) {
      const real = type.slice(prefix.length);
      if (real) {
        script.setAttribute("type", real);
      } else {
        script.removeAttribute("type");
      }
    }
  }

  const links = [];
  for (const element of doc.querySelectorAll("[href]")) {
    links.push(element.getAttribute("href"));
  }
  for (const element of doc.querySelectorAll("[src]")) {
    links.push(element.getAttribute("src"));
  }
  for (const element of doc.querySelectorAll("[srcset]")) {
    for (const candidate of element.getAttribute("srcset").split(",")) {
      const url = candidate.trim().split(/\s+/)[0];
      if (url) {
        links.push(url);
      }
    }
  }

  return { content: doc.documentElement.outerHTML, links };
})"#;

/// Replace link attribute values found in `rewrites`.
const REWRITE_LINKS_SCRIPT: &str = r#"(function (content, rewrites) {
  const doc = new DOMParser().parseFromString(content, "text/html");
  const lookup = (value) =>
    Object.prototype.hasOwnProperty.call(rewrites, value) ? rewrites[value] : value;

  for (const name of ["href", "src"]) {
    for (const element of doc.querySelectorAll("[" + name + "]")) {
      element.setAttribute(name, lookup(element.getAttribute(name)));
    }
  }
  for (const element of doc.querySelectorAll("[srcset]")) {
    const candidates = element.getAttribute("srcset").split(",").map((candidate) => {
      const parts = candidate.trim().split(/\s+/);
      parts[0] = lookup(parts[0]);
      return parts.join(" ");
    });
    element.setAttribute("srcset", candidates.join(", "));
  }

  return doc.documentElement.outerHTML;
})"#;

/// Output of the finalize transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedDocument {
    /// Serialized `<html>` element, without doctype
    pub content: String,

    /// Raw `href`, `src` and `srcset` values, in document order
    pub links: Vec<String>,
}

impl FinalizedDocument {
    /// Same-origin routes referenced by the document at `page_url`.
    pub fn linked_routes(&self, page_url: &Url, base: &Url) -> Vec<Route> {
        self.links
            .iter()
            .filter_map(|raw| Route::resolve(raw, page_url, base))
            .collect()
    }
}

/// Handle to the long-lived worker page.
#[derive(Clone)]
pub struct Worker {
    page: Page,
}

impl Worker {
    /// Open the worker page in `browser`.
    pub async fn open(browser: &Browser) -> Result<Self, RenderError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Browser(format!("Failed to open worker page: {}", e)))?;
        Ok(Self { page })
    }

    /// The underlying browser page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Disable client-side scripts before the browser sees the document.
    pub async fn prepare(&self, content: &str) -> Result<String, RenderError> {
        self.call(PREPARE_SCRIPT, &[to_js(content)?]).await
    }

    /// Strip build-time elements, restore scripts and collect links.
    pub async fn finalize(&self, content: &str) -> Result<FinalizedDocument, RenderError> {
        self.call(FINALIZE_SCRIPT, &[to_js(content)?]).await
    }

    /// Rewrite link attributes whose exact value is a key of `rewrites`.
    pub async fn rewrite_links(
        &self,
        content: &str,
        rewrites: &BTreeMap<String, String>,
    ) -> Result<String, RenderError> {
        if rewrites.is_empty() {
            return Ok(content.to_string());
        }
        self.call(REWRITE_LINKS_SCRIPT, &[to_js(content)?, to_js(rewrites)?])
            .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        args: &[String],
    ) -> Result<T, RenderError> {
        let expression = call_expression(function, args);
        let result = self
            .page
            .evaluate(expression.as_str())
            .await
            .map_err(|e| RenderError::Worker(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| RenderError::Worker(format!("Unexpected worker result: {}", e)))
    }
}

/// Relative replacements for every same-origin link on the page at `page_url`.
///
/// Fragment-only links already point at the page itself and are left alone.
pub fn relative_rewrites(
    links: &[String],
    page_url: &Url,
    base: &Url,
) -> BTreeMap<String, String> {
    links
        .iter()
        .filter(|raw| !raw.starts_with('#'))
        .filter(|raw| Route::resolve(raw, page_url, base).is_some())
        .filter_map(|raw| {
            let target = page_url.join(raw.trim()).ok()?;
            Some((raw.clone(), relativize_url(&target, page_url)))
        })
        .collect()
}

fn call_expression(function: &str, args: &[String]) -> String {
    format!("({})({})", function, args.join(", "))
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<String, RenderError> {
    serde_json::to_string(value).map_err(|e| RenderError::Worker(e.to_string()))
}

/// Middleware transform running [`Worker::prepare`] over served pages.
pub struct PrepareTransform {
    worker: Worker,
}

impl PrepareTransform {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }
}

impl ResponseTransform for PrepareTransform {
    async fn transform(
        &self,
        path: String,
        body: Bytes,
    ) -> Result<Option<Bytes>, TransformError> {
        let content = String::from_utf8_lossy(&body);
        match self.worker.prepare(&content).await {
            Ok(prepared) => Ok(Some(Bytes::from(prepared))),
            Err(e) => Err(TransformError::Failed {
                path,
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://127.0.0.1:3000/").unwrap()
    }

    #[test]
    fn scripts_agree_on_marker_and_prefix() {
        for script in [PREPARE_SCRIPT, FINALIZE_SCRIPT] {
            assert!(script.contains(BUILD_MARKER));
            assert!(script.contains(DISABLED_SCRIPT_PREFIX));
        }
    }

    #[test]
    fn builds_call_expression_with_json_arguments() {
        let args = vec![
            to_js("<p>\"quoted\"</p>\n").unwrap(),
            to_js(&BTreeMap::from([("/a".to_string(), "a".to_string())])).unwrap(),
        ];
        assert_eq!(
            call_expression("(function (a, b) {})", &args),
            r#"((function (a, b) {}))("<p>\"quoted\"</p>\n", {"/a":"a"})"#
        );
    }

    #[test]
    fn resolves_linked_routes() {
        let page_url = base().join("/blog/post.html").unwrap();
        let doc = FinalizedDocument {
            content: String::new(),
            links: vec![
                "/".to_string(),
                "../lib/page.css".to_string(),
                "photo.jpg".to_string(),
                "https://example.com/".to_string(),
                "#comments".to_string(),
            ],
        };

        let routes: Vec<String> = doc
            .linked_routes(&page_url, &base())
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            routes,
            vec![
                "/index.html",
                "/lib/page.css",
                "/blog/photo.jpg",
                "/blog/post.html"
            ]
        );
    }

    #[test]
    fn computes_relative_rewrites() {
        let page_url = base().join("/blog/post.html").unwrap();
        let links = vec![
            "/".to_string(),
            "/lib/dom.js".to_string(),
            "/blog/other.html#x".to_string(),
            "#top".to_string(),
            "https://example.com/a".to_string(),
        ];

        let rewrites = relative_rewrites(&links, &page_url, &base());
        assert_eq!(
            rewrites,
            BTreeMap::from([
                ("/".to_string(), "../".to_string()),
                ("/lib/dom.js".to_string(), "../lib/dom.js".to_string()),
                ("/blog/other.html#x".to_string(), "other.html#x".to_string()),
            ])
        );
    }

    /// Headless Chromium with its event handler, for the tests below.
    struct TestBrowser {
        browser: Browser,
        _handler: tokio::task::JoinHandle<()>,
    }

    async fn setup_browser() -> TestBrowser {
        use futures::StreamExt;

        let config = crate::RenderOptions {
            sandbox: false,
            ..Default::default()
        }
        .browser_config()
        .unwrap();
        let (browser, mut handler) = Browser::launch(config).await.unwrap();
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    eprintln!("Browser event error: {:?}", e);
                }
            }
        });

        TestBrowser {
            browser,
            _handler: handler,
        }
    }

    #[tokio::test]
    #[ignore = "requires Chromium"]
    async fn prepare_disables_client_scripts_only() {
        let chrome = setup_browser().await;
        let worker = Worker::open(&chrome.browser).await.unwrap();

        let prepared = worker
            .prepare(concat!(
                "<!DOCTYPE html><html><head></head><body>",
                "<script>a()</script>",
                "<script type=\"module\">b()</script>",
                "<script type=\"text/javascript\">c()</script>",
                "<script data-build>d()</script>",
                "<script type=\"application/ld+json\">{}</script>",
                "</body></html>",
            ))
            .await
            .unwrap();

        assert_eq!(
            prepared,
            concat!(
                "<!DOCTYPE html>\n<html><head></head><body>",
                "<script type=\"text/plain;real-type=\">a()</script>",
                "<script type=\"text/plain;real-type=module\">b()</script>",
                "<script type=\"text/plain;real-type=text/javascript\">c()</script>",
                "<script data-build=\"\">d()</script>",
                "<script type=\"application/ld+json\">{}</script>",
                "</body></html>",
            )
        );
    }

    #[tokio::test]
    #[ignore = "requires Chromium"]
    async fn finalize_removes_build_elements_without_blank_lines() {
        let chrome = setup_browser().await;
        let worker = Worker::open(&chrome.browser).await.unwrap();

        let doc = worker
            .finalize(concat!(
                "<html><head>\n",
                "  <script data-build>x()</script>\n",
                "  <title>t</title>\n",
                "</head><body>\n",
                "  <p>a</p>\n",
                "  <div data-build>tmp</div>\n",
                "  <p>b</p>\n",
                "</body></html>",
            ))
            .await
            .unwrap();

        assert_eq!(
            doc.content,
            concat!(
                "<html><head>\n",
                "  <title>t</title>\n",
                "</head><body>\n",
                "  <p>a</p>\n",
                "  <p>b</p>\n",
                "</body></html>",
            )
        );
        assert!(doc.links.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires Chromium"]
    async fn finalize_restores_original_script_types() {
        let chrome = setup_browser().await;
        let worker = Worker::open(&chrome.browser).await.unwrap();

        let doc = worker
            .finalize(concat!(
                "<html><head></head><body>",
                "<script type=\"text/plain;real-type=module\" src=\"m.js\"></script>",
                "<script type=\"text/plain;real-type=text/javascript\">c()</script>",
                "<script src=\"x.js\" type=\"text/plain;real-type=\"></script>",
                "<script type=\"application/ld+json\">{}</script>",
                "</body></html>",
            ))
            .await
            .unwrap();

        assert_eq!(
            doc.content,
            concat!(
                "<html><head></head><body>",
                "<script type=\"module\" src=\"m.js\"></script>",
                "<script type=\"text/javascript\">c()</script>",
                "<script src=\"x.js\"></script>",
                "<script type=\"application/ld+json\">{}</script>",
                "</body></html>",
            )
        );
        assert_eq!(doc.links, vec!["m.js", "x.js"]);
    }

    #[tokio::test]
    #[ignore = "requires Chromium"]
    async fn prepare_and_finalize_restore_the_document() {
        let chrome = setup_browser().await;
        let worker = Worker::open(&chrome.browser).await.unwrap();

        let prepared = worker
            .prepare(concat!(
                "<!DOCTYPE html><html><head>",
                "<script type=\"module\" src=\"m.js\"></script>",
                "</head><body><script>a()</script></body></html>",
            ))
            .await
            .unwrap();
        let doc = worker.finalize(&prepared).await.unwrap();

        assert_eq!(
            doc.content,
            concat!(
                "<html><head>",
                "<script type=\"module\" src=\"m.js\"></script>",
                "</head><body><script>a()</script></body></html>",
            )
        );
    }

    #[tokio::test]
    #[ignore = "requires Chromium"]
    async fn finalize_links_every_srcset_candidate() {
        let chrome = setup_browser().await;
        let worker = Worker::open(&chrome.browser).await.unwrap();

        let doc = worker
            .finalize(concat!(
                "<html><head><link rel=\"icon\" href=\"/favicon.ico\"></head><body>",
                "<img src=\"a.png\" srcset=\"a.png 1x, img/b%20c.png 2x,  /d.png 3x\">",
                "<picture><source srcset=\"e.webp\"></picture>",
                "<a href=\"https://example.com/\">x</a>",
                "</body></html>",
            ))
            .await
            .unwrap();

        assert_eq!(
            doc.links,
            vec![
                "/favicon.ico",
                "https://example.com/",
                "a.png",
                "a.png",
                "img/b%20c.png",
                "/d.png",
                "e.webp",
            ]
        );

        let page_url = base().join("/gallery/index.html").unwrap();
        let linked: std::collections::BTreeSet<String> = doc
            .linked_routes(&page_url, &base())
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            linked,
            std::collections::BTreeSet::from([
                "/favicon.ico".to_string(),
                "/gallery/a.png".to_string(),
                "/gallery/img/b%20c.png".to_string(),
                "/d.png".to_string(),
                "/gallery/e.webp".to_string(),
            ])
        );
    }
}
