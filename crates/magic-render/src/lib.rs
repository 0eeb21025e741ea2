//! Headless rendering of minimal-magic pages.
//!
//! A [`RenderSession`] owns one Chromium process, one worker page used for
//! off-screen document transforms, and a local server over the source tree.
//! Each [`RenderSession::build`] call loads a page in a fresh tab, waits for
//! the network to go idle, and returns the finalized HTML together with the
//! files the page loaded and linked.

pub mod html;
pub mod network;
pub mod options;
pub mod page;
pub mod session;
pub mod worker;

pub use options::{RenderOptions, Viewport};
pub use page::{PageRenderResult, PageRenderer};
pub use session::{RenderError, RenderSession};
pub use worker::{FinalizedDocument, PrepareTransform, Worker};
