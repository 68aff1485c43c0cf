//! USD (Universal Scene Description) layer support.
//!
//! This module reads and writes USDA text layers and composes them into a
//! flattened [`Stage`].
//!
//! ## Supported USD Features
//!
//! - Layer metadata, `def` / `over` / `class` prims, list-op metadata
//! - Typed attributes, connections, time samples (first sample is used)
//! - Relationships
//! - Sublayers, references, payloads and internal references
//! - Binary `.usdc` layers through an external `usdcat`
//!
//! ## Not Supported
//!
//! - Variant selection (variant sets are carried through untouched)
//! - Inherits and specializes
//! - Time-sampled animation evaluation
//!
//! # Example
//!
//! ```ignore
//! use remix_core::usd::Stage;
//!
//! let stage = Stage::open("mod.usda")?;
//! stage.traverse(|prim| println!("{}", prim.path));
//! ```

mod parser;
mod stage;
mod types;
mod value;
mod writer;

pub use parser::*;
pub use stage::*;
pub use types::*;
pub use value::*;
pub use writer::*;
