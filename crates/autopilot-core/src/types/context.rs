//! Context items attached to a session and prepended to model prompts.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifier of a context item: the provider that produced it plus an item key.
///
/// The string form is `provider-item`. Provider titles are restricted to
/// `[0-9A-Za-z_]` so the first `-` always separates the two halves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextItemId {
    /// Provider title
    pub provider: String,
    /// Item key within the provider
    pub item: String,
}

impl ContextItemId {
    /// Creates a validated identifier.
    ///
    /// # Errors
    /// Returns an error if either half is empty or contains disallowed characters.
    pub fn new(provider: impl Into<String>, item: impl Into<String>) -> Result<Self> {
        let provider = provider.into();
        let item = item.into();
        if provider.is_empty()
            || !provider
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(Error::Other(format!(
                "Invalid context provider title '{provider}'"
            )));
        }
        if item.is_empty()
            || !item
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        {
            return Err(Error::Other(format!("Invalid context item key '{item}'")));
        }
        Ok(Self { provider, item })
    }
}

impl fmt::Display for ContextItemId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}-{}", self.provider, self.item)
    }
}

impl FromStr for ContextItemId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let (provider, item) = value
            .split_once('-')
            .ok_or_else(|| Error::Other(format!("Invalid context item id '{value}'")))?;
        Self::new(provider, item)
    }
}

/// A piece of context supplied by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Identifier (provider plus key)
    pub id: ContextItemId,
    /// Display name
    pub name: String,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Content included in prompts
    pub content: String,
    /// Whether the user may edit the content
    #[serde(default)]
    pub editable: bool,
}

/// Ordered collection of context items with unique identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextItems {
    items: Vec<ContextItem>,
}

impl ContextItems {
    /// Empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an item. An item with the same id is replaced in place.
    pub fn insert(&mut self, item: ContextItem) {
        if let Some(existing) = self.items.iter_mut().find(|existing| existing.id == item.id) {
            *existing = item;
        } else {
            self.items.push(item);
        }
    }

    /// Removes the item with `id`, returning it.
    pub fn remove(&mut self, id: &ContextItemId) -> Option<ContextItem> {
        let index = self.items.iter().position(|item| &item.id == id)?;
        Some(self.items.remove(index))
    }

    /// Replaces the content of an editable item.
    ///
    /// # Errors
    /// Returns an error if the item is missing or not editable.
    pub fn edit(&mut self, id: &ContextItemId, content: impl Into<String>) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| Error::Other(format!("Context item '{id}' not found")))?;
        if !item.editable {
            return Err(Error::Other(format!("Context item '{id}' is not editable")));
        }
        item.content = content.into();
        Ok(())
    }

    /// Item lookup by id.
    #[must_use]
    pub fn get(&self, id: &ContextItemId) -> Option<&ContextItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Items in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ContextItem> {
        self.items.iter()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Renders items as a prompt prefix, one fenced block per item.
    #[must_use]
    pub fn render_prompt_prefix(&self) -> String {
        let mut rendered = String::new();
        for item in &self.items {
            rendered.push_str("```");
            rendered.push_str(&item.name);
            rendered.push('\n');
            rendered.push_str(&item.content);
            if !item.content.ends_with('\n') {
                rendered.push('\n');
            }
            rendered.push_str("```\n\n");
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(provider: &str, key: &str, content: &str, editable: bool) -> ContextItem {
        let id = match ContextItemId::new(provider, key) {
            Ok(id) => id,
            Err(err) => panic!("invalid id: {err}"),
        };
        ContextItem {
            id,
            name: key.to_owned(),
            description: String::new(),
            content: content.to_owned(),
            editable,
        }
    }

    #[test]
    fn test_id_splits_on_first_dash() {
        let id: ContextItemId = match "file-src-main_rs".parse() {
            Ok(id) => id,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(id.provider, "file");
        assert_eq!(id.item, "src-main_rs");
        assert_eq!(id.to_string(), "file-src-main_rs");
    }

    #[test]
    fn test_id_rejects_bad_provider() {
        assert!(ContextItemId::new("bad provider", "x").is_err());
        assert!(ContextItemId::new("", "x").is_err());
        assert!("nodash".parse::<ContextItemId>().is_err());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut items = ContextItems::new();
        items.insert(item("file", "a", "one", false));
        items.insert(item("file", "b", "two", false));
        items.insert(item("file", "a", "uno", false));

        let contents: Vec<&str> = items.iter().map(|item| item.content.as_str()).collect();
        assert_eq!(contents, ["uno", "two"]);
    }

    #[test]
    fn test_edit_requires_editable() {
        let mut items = ContextItems::new();
        let locked = item("file", "locked", "x", false);
        let open = item("file", "open", "y", true);
        let (locked_id, open_id) = (locked.id.clone(), open.id.clone());
        items.insert(locked);
        items.insert(open);

        assert!(items.edit(&locked_id, "changed").is_err());
        assert!(items.edit(&open_id, "changed").is_ok());
        assert_eq!(items.get(&open_id).map(|item| item.content.as_str()), Some("changed"));
    }

    #[test]
    fn test_render_prompt_prefix() {
        let mut items = ContextItems::new();
        items.insert(item("file", "notes", "remember", false));
        assert_eq!(items.render_prompt_prefix(), "```notes\nremember\n```\n\n");
        items.clear();
        assert!(items.render_prompt_prefix().is_empty());
    }
}
