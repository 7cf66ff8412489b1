//! Tile map (TMX) loading.
//!
//! Only the parts the level builder needs are read: map metadata, tile layers with CSV data
//! (plain or split into chunks) and custom properties. Everything else in the document is
//! skipped.

mod chunk;
mod layer;
mod map;
mod properties;

pub use layer::TmxLayer;
pub use map::TmxMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TmxError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed xml attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("attribute '{name}' has invalid value '{value}'")]
    InvalidAttribute { name: String, value: String },
    #[error("invalid tile id '{token}' in csv data")]
    InvalidTile { token: String },
    #[error("layer data holds {found} tiles, expected {expected}")]
    DataLength { expected: usize, found: usize },
    #[error("chunk at ({x}, {y}) is {width}x{height}, expected {expected_width}x{expected_height}")]
    ChunkSizeMismatch {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("no chunks to merge")]
    NoChunks,
    #[error("unsupported layer data encoding '{0}'")]
    UnsupportedEncoding(String),
    #[error("layer '{0}' has no data element")]
    MissingData(String),
    #[error("no tile layer in document")]
    NoLayer,
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
