//! Action categories: the free-form labels an agent assigns to its own turns.
//!
//! A [`CategoryRegistry`] is a catalog of *known* categories. It never decides
//! whether a label is legal: agents may invent categories at runtime, and every
//! consumer of the registry must treat "not registered" as an ordinary outcome.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CategoryError;

/// A single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Unique key (e.g. "analyze", "compute").
    pub name: String,

    /// What this kind of action means.
    pub description: String,

    /// Recommended follow-up categories, in preference order.
    /// May be empty (terminal) and may name unregistered categories.
    #[serde(default)]
    pub suggested_next: Vec<String>,

    /// Tools commonly used for this category. Informational only.
    #[serde(default, alias = "tools")]
    pub tool_affinity: Vec<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            suggested_next: Vec::new(),
            tool_affinity: Vec::new(),
        }
    }

    /// Set the suggested follow-up categories.
    pub fn with_next<I, S>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_next = next.into_iter().map(Into::into).collect();
        self
    }

    /// Set the informational tool affinity.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_affinity = tools.into_iter().map(Into::into).collect();
        self
    }

    /// A category with no suggested follow-ups.
    pub fn is_terminal(&self) -> bool {
        self.suggested_next.is_empty()
    }
}

/// Ordered catalog of known categories.
///
/// Read-only once built, so a single registry can be shared (via `Arc`)
/// across concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    entries: Vec<Category>,
    index: HashMap<String, usize>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category. Names are unique; re-registering is an error.
    pub fn add(&mut self, category: Category) -> Result<(), CategoryError> {
        if self.index.contains_key(&category.name) {
            return Err(CategoryError::Duplicate(category.name));
        }
        self.index.insert(category.name.clone(), self.entries.len());
        self.entries.push(category);
        Ok(())
    }

    /// Look up a category. Unknown names are `None`, never an error.
    pub fn get(&self, name: &str) -> Option<&Category> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All categories in insertion order. Each call starts a fresh iterator.
    pub fn all(&self) -> impl Iterator<Item = &Category> + '_ {
        self.entries.iter()
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a registry from a list, failing on the first duplicate.
    pub fn from_categories<I>(categories: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = Category>,
    {
        let mut registry = Self::new();
        for category in categories {
            registry.add(category)?;
        }
        Ok(registry)
    }
}

/// The stock analysis catalog: analyze → plan → compute ⇄ verify → synthesize → done.
pub fn default_catalog() -> CategoryRegistry {
    let categories = [
        Category::new(
            "analyze",
            "Understand the problem, identify what data and computations are needed",
        )
        .with_next(["plan", "compute"]),
        Category::new("plan", "Break the task into concrete computation steps")
            .with_next(["compute"]),
        Category::new("compute", "Perform a calculation using tools")
            .with_next(["verify", "compute"])
            .with_tools(["calc", "compound", "stats"]),
        Category::new("verify", "Check a previous computation for correctness")
            .with_next(["compute", "synthesize"])
            .with_tools(["calc", "compound"]),
        Category::new("synthesize", "Combine results into a final answer").with_next(["done"]),
        Category::new("done", "Task is complete, present final results"),
    ];

    let mut registry = CategoryRegistry::new();
    for category in categories {
        // Names above are distinct.
        let _ = registry.add(category);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut registry = CategoryRegistry::new();
        registry
            .add(Category::new("analyze", "Look at the problem").with_next(["plan"]))
            .unwrap();

        let found = registry.get("analyze").unwrap();
        assert_eq!(found.suggested_next, vec!["plan"]);
        assert!(registry.get("improvise").is_none());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = CategoryRegistry::new();
        registry.add(Category::new("a", "first")).unwrap();
        let err = registry.add(Category::new("a", "second")).unwrap_err();
        assert_eq!(err, CategoryError::Duplicate("a".into()));
        // The original entry is untouched.
        assert_eq!(registry.get("a").unwrap().description, "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_preserves_insertion_order_and_restarts() {
        let registry = CategoryRegistry::from_categories([
            Category::new("zeta", ""),
            Category::new("alpha", ""),
            Category::new("mid", ""),
        ])
        .unwrap();

        let first: Vec<_> = registry.all().map(|c| c.name.as_str()).collect();
        let second: Vec<_> = registry.all().map(|c| c.name.as_str()).collect();
        assert_eq!(first, vec!["zeta", "alpha", "mid"]);
        assert_eq!(first, second);
    }

    #[test]
    fn forward_references_are_allowed() {
        let mut registry = CategoryRegistry::new();
        registry
            .add(Category::new("draft", "").with_next(["review-later"]))
            .unwrap();
        assert!(!registry.contains("review-later"));
        assert_eq!(registry.get("draft").unwrap().suggested_next, vec!["review-later"]);
    }

    #[test]
    fn default_catalog_shape() {
        let catalog = default_catalog();
        assert_eq!(
            catalog.names(),
            vec!["analyze", "plan", "compute", "verify", "synthesize", "done"]
        );
        assert!(catalog.get("done").unwrap().is_terminal());
        assert_eq!(
            catalog.get("compute").unwrap().tool_affinity,
            vec!["calc", "compound", "stats"]
        );
    }

    #[test]
    fn category_deserializes_tools_alias() {
        let json = r#"{"name":"verify","description":"check","tools":["calc"]}"#;
        let category: Category = serde_json::from_str(json).unwrap();
        assert_eq!(category.tool_affinity, vec!["calc"]);
        assert!(category.suggested_next.is_empty());
    }
}
