use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use xmltree::Element;

/// Category documents fetched in one poll cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub fetched_at: DateTime<Utc>,
    categories: BTreeMap<String, Element>,
}

impl Snapshot {
    pub fn new(categories: BTreeMap<String, Element>) -> Self {
        Self {
            fetched_at: Utc::now(),
            categories,
        }
    }

    pub fn category(&self, key: &str) -> Option<&Element> {
        self.categories.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
