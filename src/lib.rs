//! `ikup`: display raster images in a terminal via the Kitty Graphics
//! Protocol, addressed through Unicode placeholder cells rather than raw
//! cursor-relative placement.
//!
//! See each module for its corresponding piece of the design: [`id`] (image
//! id allocation), [`cache`] (conversion cache and byte-budget optimizer),
//! [`upload`] (upload coordination), [`protocol`] (wire codec),
//! [`placeholder`] (Unicode placeholder rendering), [`geometry`] (cell-size
//! fitting), [`config`] (settings), [`detection`] (terminal/session
//! detection), [`formula`]/[`place_spec`] (the CLI's placement
//! mini-language), and [`terminal`] (the orchestrator tying all of the
//! above together).

pub mod cache;
pub mod config;
pub mod detection;
pub mod error;
pub mod formula;
pub mod geometry;
pub mod id;
pub mod image_codec;
pub mod place_spec;
pub mod placeholder;
pub mod protocol;
pub mod terminal;
pub mod upload;

pub use error::{Error, Result};
