//! Persistent storage primitives
//!
//! Two small stores back the rest of the system: the single-row
//! [`offset::OffsetStore`] that bookmarks polling progress, and the
//! key-addressed [`blob::BlobStore`] holding archived sessions.

pub mod blob;
pub mod offset;

pub use blob::{BlobError, BlobInfo, BlobStore, FsBlobStore};
pub use offset::{Cursor, OffsetStore, OffsetStoreError};
