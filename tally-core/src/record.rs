//! The `FlatRecord` trait: the seam between entities and the flat-file store.
//!
//! The store, the line codec, and the integrity validator are all generic
//! over this trait. An implementation describes its own header line and how
//! it converts to and from a row of string fields; the codec owns quoting
//! and delimiter handling, so `to_fields`/`from_fields` deal in raw values.

use crate::error::CodecError;

/// A record that can be persisted as one line of the store file.
///
/// # Implementation Requirements
///
/// - `HEADER` must name the fields in the exact order `to_fields` emits them
/// - `FIELD_COUNT` must equal the number of header fields
/// - `id()` is the stable unique identifier; `0` means "not yet assigned"
///   and asks the store to allocate `max(existing) + 1` on create
/// - `version()` starts at 0 and is bumped by exactly one per successful
///   update; implementations never mutate it themselves
/// - Numeric fields must format and parse locale-invariantly
pub trait FlatRecord: Clone + PartialEq + Send + Sync + 'static {
    /// The literal header line of the store file.
    const HEADER: &'static str;

    /// Number of fields every data line must carry.
    const FIELD_COUNT: usize;

    /// Stable unique identifier.
    fn id(&self) -> u64;

    /// Assign the identifier (used by the store for server-assigned ids).
    fn set_id(&mut self, id: u64);

    /// Current version counter.
    fn version(&self) -> u64;

    /// Overwrite the version counter (used only by the store).
    fn set_version(&mut self, version: u64);

    /// Convert to an ordered row of raw field values.
    fn to_fields(&self) -> Vec<String>;

    /// Reconstruct from an ordered row of raw field values.
    ///
    /// The slice is guaranteed to have `FIELD_COUNT` entries; individual
    /// field parse failures return a [`CodecError`] the scanner will skip.
    fn from_fields(fields: &[String]) -> Result<Self, CodecError>;
}
