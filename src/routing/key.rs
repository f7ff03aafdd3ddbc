//! Stable route identity used as the admission policy cache key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A (controller, action) pair naming one route.
///
/// Stream routes declare theirs at registration; plain HTTP routes use the
/// matched path and method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub controller: String,
    pub action: String,
}

impl RouteKey {
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
        }
    }

    /// Key shared by requests that matched no route.
    pub fn unmatched() -> Self {
        Self::new("*", "*")
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.controller, self.action)
    }
}
