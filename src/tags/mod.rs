pub mod challenge;
pub mod extractor;
pub mod rules;

/// A `(namespace, name)` pair read off a page, before it is stored.
/// The namespace is empty for untyped tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawTag {
    pub namespace: String,
    pub name: String,
}

impl RawTag {
    /// Normalises the way hydrus expects: lower case, spaces for underscores.
    /// Returns `None` for blank names.
    pub fn new(namespace: &str, name: &str) -> Option<Self> {
        let name = name.trim().replace('_', " ").to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.trim().to_lowercase(),
            name,
        })
    }
}
