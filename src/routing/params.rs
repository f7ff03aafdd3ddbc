//! Parameters extracted from a matched stream route.

use smallvec::SmallVec;

/// Parameters kept inline before spilling to the heap.
const INLINE_PARAMS: usize = 4;

/// Name → value pairs bound while matching a request against a template.
///
/// Keys are unique: inserting an existing name keeps the first value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteParameters {
    inner: SmallVec<[(String, String); INLINE_PARAMS]>,
}

impl RouteParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `value` unless the name is already bound.
    /// Returns false when the name was already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.inner.push((name, value.into()));
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for RouteParameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut params = RouteParameters::new();
        assert!(params.insert("groupId", "42"));
        assert!(params.insert("userId", "7"));

        assert_eq!(params.get("groupId"), Some("42"));
        assert_eq!(params.get("userId"), Some("7"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_duplicate_name_keeps_first_value() {
        let mut params = RouteParameters::new();
        assert!(params.insert("id", "first"));
        assert!(!params.insert("id", "second"));

        assert_eq!(params.get("id"), Some("first"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_spills_past_inline_capacity() {
        let params: RouteParameters = (0..10)
            .map(|i| (format!("p{i}"), i.to_string()))
            .collect();

        assert_eq!(params.len(), 10);
        assert_eq!(params.get("p9"), Some("9"));
    }
}
