use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::embedding::Embedding;

/// Category a catalog entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Category {
    /// Category identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// URL slug.
    #[serde(default)]
    pub slug: String,
}

impl Category {
    /// True when `filter` names this category by id or slug.
    pub fn matches(&self, filter: &str) -> bool {
        self.id == filter || (!self.slug.is_empty() && self.slug == filter)
    }
}

/// A searchable catalog item.
///
/// The embedding is optional. Entries without one are excluded from ranking
/// and never scored. The embedding is accepted from the catalog source but
/// not echoed back in responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Item identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// URL slug.
    #[serde(default)]
    pub slug: String,
    /// Price in the catalog's currency.
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: f64,
    /// Image URLs or paths.
    #[serde(default)]
    pub images: Vec<String>,
    /// Owning category.
    #[serde(default)]
    pub category: Option<Category>,
    /// Precomputed image embedding.
    #[serde(
        default,
        rename = "feature_vector",
        alias = "featureVector",
        alias = "features",
        skip_serializing,
        deserialize_with = "deserialize_embedding"
    )]
    pub embedding: Option<Embedding>,
}

impl CatalogEntry {
    /// Create an entry with only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slug: String::new(),
            price: 0.0,
            images: Vec::new(),
            category: None,
            embedding: None,
        }
    }

    /// Attach an embedding.
    pub fn with_embedding(mut self, embedding: impl Into<Embedding>) -> Self {
        self.embedding = Some(embedding.into());
        self
    }

    /// Attach a category.
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// True when the entry passes an optional category filter.
    pub fn in_category(&self, filter: Option<&str>) -> bool {
        match filter {
            None => true,
            Some(f) => self.category.as_ref().is_some_and(|c| c.matches(f)),
        }
    }
}

/// An ordered, point-in-time list of catalog entries.
///
/// The order is meaningful: it is the secondary sort key when two entries
/// score the same.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogSnapshot {
    entries: Vec<CatalogEntry>,
}

impl CatalogSnapshot {
    /// Build a snapshot from entries in their canonical order.
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a list of loosely-typed product records.
    ///
    /// Records that fail to parse are skipped with a warning so one bad row
    /// cannot take out the rest of the catalog.
    pub fn from_values(values: Vec<Value>) -> Self {
        let mut entries = Vec::with_capacity(values.len());
        for (position, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<CatalogEntry>(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("Skipping malformed catalog record #{}: {}", position, e),
            }
        }
        Self { entries }
    }

    /// Parse a JSON document holding either a bare array of products or an
    /// object with a `products` array.
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json_str)?;
        Ok(Self::from_values(products_from_value(value)))
    }

    /// Entries in snapshot order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the snapshot holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in snapshot order.
    pub fn iter(&self) -> std::slice::Iter<'_, CatalogEntry> {
        self.entries.iter()
    }

    /// Keep entries passing the category filter, capped at `max_items`.
    pub fn filtered(self, category: Option<&str>, max_items: usize) -> Self {
        let entries = self
            .entries
            .into_iter()
            .filter(|e| e.in_category(category))
            .take(max_items)
            .collect();
        Self { entries }
    }
}

impl From<Vec<CatalogEntry>> for CatalogSnapshot {
    fn from(entries: Vec<CatalogEntry>) -> Self {
        Self::new(entries)
    }
}

impl FromIterator<CatalogEntry> for CatalogSnapshot {
    fn from_iter<I: IntoIterator<Item = CatalogEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a CatalogSnapshot {
    type Item = &'a CatalogEntry;
    type IntoIter = std::slice::Iter<'a, CatalogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Pull the product list out of a backend response body.
pub(crate) fn products_from_value(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("products") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn deserialize_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    // Decimal columns often arrive as strings.
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("price out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid price {:?}: {}", s, e))),
        Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!("invalid price: {}", other))),
    }
}

fn deserialize_embedding<'de, D>(deserializer: D) -> Result<Option<Embedding>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<f32>>::deserialize(deserializer)?;
    Ok(values.filter(|v| !v.is_empty()).map(Embedding::new))
}
