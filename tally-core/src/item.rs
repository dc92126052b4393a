//! The `Item` entity persisted by the store.

use crate::error::CodecError;
use crate::record::FlatRecord;
use serde::{Deserialize, Serialize};

/// A catalog item: the concrete record type of the store file.
///
/// `item_id` is globally unique within one store file. `version` implements
/// optimistic concurrency: it starts at 0 on create and the store increments
/// it by exactly one per successful update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier; 0 requests server-side assignment on create.
    pub item_id: u64,
    /// Display name.
    pub name: String,
    /// Free-text description; may contain commas, quotes, or newlines.
    pub description: String,
    /// Unit price, encoded locale-invariantly.
    pub price: f64,
    /// Optimistic concurrency version counter.
    pub version: u64,
}

impl Item {
    /// Create a new item at version 0 with an unassigned id.
    pub fn new(name: impl Into<String>, description: impl Into<String>, price: f64) -> Self {
        Self {
            item_id: 0,
            name: name.into(),
            description: description.into(),
            price,
            version: 0,
        }
    }

    /// Create a new item at version 0 with a client-supplied id.
    pub fn with_id(
        item_id: u64,
        name: impl Into<String>,
        description: impl Into<String>,
        price: f64,
    ) -> Self {
        Self {
            item_id,
            ..Self::new(name, description, price)
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    raw: &str,
    field: &'static str,
) -> Result<T, CodecError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| CodecError::FieldParse {
        field,
        reason: e.to_string(),
    })
}

impl FlatRecord for Item {
    const HEADER: &'static str = "Id,Name,Description,Price,Version";
    const FIELD_COUNT: usize = 5;

    fn id(&self) -> u64 {
        self.item_id
    }

    fn set_id(&mut self, id: u64) {
        self.item_id = id;
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.item_id.to_string(),
            self.name.clone(),
            self.description.clone(),
            // Rust float formatting is locale-invariant and round-trips
            // through str::parse.
            format!("{}", self.price),
            self.version.to_string(),
        ]
    }

    fn from_fields(fields: &[String]) -> Result<Self, CodecError> {
        Ok(Self {
            item_id: parse_field(&fields[0], "Id")?,
            name: fields[1].clone(),
            description: fields[2].clone(),
            price: parse_field(&fields[3], "Price")?,
            version: parse_field(&fields[4], "Version")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_starts_at_version_zero() {
        let item = Item::new("Widget", "A widget", 9.99);
        assert_eq!(item.item_id, 0);
        assert_eq!(item.version, 0);
    }

    #[test]
    fn test_fields_roundtrip() {
        let item = Item::with_id(12, "Widget", "A, \"quoted\" widget", 10.5);
        let fields = item.to_fields();
        assert_eq!(fields.len(), Item::FIELD_COUNT);
        let back = Item::from_fields(&fields).expect("fields should parse");
        assert_eq!(item, back);
    }

    #[test]
    fn test_bad_numeric_field_is_a_parse_error() {
        let fields = vec![
            "12".to_string(),
            "Widget".to_string(),
            "desc".to_string(),
            "not-a-price".to_string(),
            "0".to_string(),
        ];
        let err = Item::from_fields(&fields).unwrap_err();
        assert!(matches!(err, CodecError::FieldParse { field: "Price", .. }));
    }

    #[test]
    fn test_header_matches_field_count() {
        assert_eq!(Item::HEADER.split(',').count(), Item::FIELD_COUNT);
    }
}
