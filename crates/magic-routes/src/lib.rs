//! Routes and link resolution for minimal-magic sites.
//!
//! A [`Route`] is an absolute same-origin path used as the key for build-time
//! dependency tracking. The free functions in [`pathing`] compute ancestor
//! directories and rewrite absolute URLs into relative ones.

pub mod pathing;
pub mod route;

pub use pathing::{ancestor_routes, relativize, RouteError};
pub use route::Route;
