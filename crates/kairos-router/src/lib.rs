//! Radix tree router for Kairos.
//!
//! The router binds `(method, pattern)` pairs to arbitrary values and
//! resolves concrete requests to one of three outcomes:
//!
//! - [`Resolution::Matched`] with the bound value and extracted [`Params`]
//! - [`Resolution::WrongMethod`] when the path is registered under other methods
//! - [`Resolution::NotFound`] when no pattern matches the path at all
//!
//! Patterns are made of literal segments and whole-segment parameters
//! (`/users/{id}`). When several patterns match the same path, the one with a
//! literal segment at the first point of divergence wins.
//!
//! # Example
//!
//! ```rust
//! use http::Method;
//! use kairos_router::{MatchKind, Router};
//!
//! let mut router = Router::new();
//! router.route(Method::GET, "/dummy", 200).unwrap();
//!
//! assert_eq!(router.resolve(&Method::GET, "/dummy").kind(), MatchKind::Matched);
//! assert_eq!(router.resolve(&Method::POST, "/dummy").kind(), MatchKind::WrongMethod);
//! assert_eq!(router.resolve(&Method::GET, "/dummy1").kind(), MatchKind::NotFound);
//! ```
//!
//! # Architecture
//!
//! ```text
//!                    (root)
//!                      │
//!                   "users"
//!              ┌───────┴───────┐
//!             "me"           {param}
//!            [GET]         [GET,DELETE]
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod method_router;
mod node;
mod params;
mod router;

pub use error::RouteError;
pub use method_router::MethodRouter;
pub use params::Params;
pub use router::{MatchKind, Resolution, RouteInfo, RouteMatch, Router};
