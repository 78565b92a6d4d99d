//! §4.C conversion cache: byte-budget optimizer plus the SQLite-backed
//! artifact store.

pub mod optimizer;
pub mod store;

pub use optimizer::{ConvertedImage, convert_image, optimize_image_to_size};
pub use store::{CachedImage, ConversionCacheStore, ConvertRequest, convert};
