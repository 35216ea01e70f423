//! Filing-text storage.
//!
//! The index never holds filing text. Chunks reference `(source_path,
//! byte_range)` and the text is read back through a [`FilingTextStore`] only
//! when a caller asks for it.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileFilingStore;
pub use memory::InMemoryFilingStore;
pub use traits::{FilingTextStore, decode_filing_text, invalid_byte_count};
