//! XML schema structures for the OOXML spreadsheet parts this migration
//! system touches: shared strings, styles (number formats only),
//! relationships, content types, and the worksheet dimension record.
//!
//! Row/cell data is not modeled here as a serde document; it is walked
//! event-by-event by the streaming reader in `migrate-core`, since a whole
//! sheet can hold millions of rows.

pub mod content_types;
pub mod namespaces;
pub mod relationships;
pub mod shared_strings;
pub mod styles;
pub mod worksheet;

pub use content_types::ContentTypes;
pub use relationships::Relationships;
pub use shared_strings::Sst;
pub use styles::StyleSheet;
pub use worksheet::Dimension;
