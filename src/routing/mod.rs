//! Path-template routing for stream handlers.
//!
//! Templates are compiled once at startup and cached; matching a request
//! yields the bound [`RouteParameters`].

mod cache;
mod key;
mod params;
mod template;

pub use cache::TemplateCache;
pub use key::RouteKey;
pub use params::RouteParameters;
pub use template::{PathTemplate, TemplateError};
