//! Link and child types discovered on a resource.

use serde_json::{Map, Value};

use crate::data_href::DataHref;

use super::Resource;

/// One entry of a resource's `_links` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Relation name.
    pub rel: String,
    /// Target href (`/`-rooted path or `data:` URI).
    pub href: String,
    /// Everything else in the link object (`title`, `revision`, ...).
    pub metadata: Map<String, Value>,
}

impl Link {
    /// Parses a `{"href": ..., ...}` link object. `None` if `href` is missing.
    pub(crate) fn from_json(rel: &str, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let href = object.get("href")?.as_str()?.to_string();
        let metadata = object
            .iter()
            .filter(|(k, _)| k.as_str() != "href")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Self {
            rel: rel.to_string(),
            href,
            metadata,
        })
    }

    /// The `title` metadata, used by UCWA for display names.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(Value::as_str)
    }
}

/// A navigable child of a resource.
#[derive(Debug, Clone)]
pub enum Child {
    /// A single resource: a stub behind a link, or a resolved embed.
    Resource(Resource),
    /// An embedded list of resources, in server order.
    Collection(Vec<Resource>),
    /// Inline content carried by a `data:` link.
    Inline(DataHref),
}
