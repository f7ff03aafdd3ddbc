//! Compile-once cache for path templates.

use std::sync::Arc;

use dashmap::DashMap;

use super::template::{PathTemplate, TemplateError};

/// Caches compiled templates keyed by template string and required query set.
///
/// Compilation has no side effects, so entries are never invalidated. Two
/// tasks compiling the same key concurrently may both do the work; the first
/// insert wins and both callers get that entry.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: DashMap<String, Arc<PathTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(
        &self,
        template: &str,
        required_query: &[String],
    ) -> Result<Arc<PathTemplate>, TemplateError> {
        let key = cache_key(template, required_query);

        if let Some(entry) = self.entries.get(&key) {
            return Ok(entry.clone());
        }

        let compiled = Arc::new(PathTemplate::compile(template, required_query.iter().cloned())?);
        let entry = self.entries.entry(key).or_insert(compiled);
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cache_key(template: &str, required_query: &[String]) -> String {
    if required_query.is_empty() {
        return template.to_string();
    }
    let mut names: Vec<&str> = required_query.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();
    format!("{}?{}", template, names.join("&"))
}
