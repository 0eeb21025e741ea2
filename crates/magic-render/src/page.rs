//! The result of rendering one page.

use std::collections::BTreeSet;
use std::future::Future;

use magic_routes::Route;

use crate::session::RenderError;

/// A rendered page and the files it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRenderResult {
    /// Route the page was rendered from
    pub route: Route,

    /// Final serialized HTML
    pub content: String,

    /// Same-origin resources the browser fetched successfully
    pub loaded: BTreeSet<Route>,

    /// Same-origin URLs referenced by `href`, `src` and `srcset`
    pub linked: BTreeSet<Route>,
}

impl PageRenderResult {
    /// Every dependency of the page, loaded or linked, without duplicates.
    pub fn dependencies(&self) -> impl Iterator<Item = &Route> {
        self.loaded.union(&self.linked)
    }
}

/// Something that can render a route into a [`PageRenderResult`].
///
/// Implemented by [`crate::RenderSession`]; the build orchestrator only
/// depends on this trait.
pub trait PageRenderer {
    fn render(&self, route: &Route) -> impl Future<Output = Result<PageRenderResult, RenderError>>;
}
