//! Tool catalog and loader for the mcpx code-execution runtime.
//!
//! Tools are plain Rust functions registered under a `(server, name)` pair.
//! The [`Catalog`] answers discovery queries without running anything; the
//! [`ToolLoader`] resolves a pair into a [`ToolBinding`] that validates
//! keyword arguments and calls the tool.
//!
//! # Example
//!
//! ```
//! use catalog::{Arguments, Catalog, SearchQuery, ToolDescriptor, ToolLoader};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> catalog::Result<()> {
//! let catalog = Catalog::builder()
//!     .with(
//!         ToolDescriptor::new("maritime-data", "vessel_tracking", "Track vessels")
//!             .with_category("maritime"),
//!         |_args| Ok(json!([{"name": "SETUR STAR", "length": 45.0}])),
//!     )?
//!     .build();
//!
//! let found = catalog.search(&SearchQuery::new("vessel"));
//! assert_eq!(found.len(), 1);
//!
//! let loader = ToolLoader::new(Arc::new(catalog));
//! let track = loader.load_tool("maritime-data", "vessel_tracking")?;
//! let vessels = track.invoke(&Arguments::new())?;
//! assert_eq!(vessels[0]["name"], "SETUR STAR");
//! # Ok(())
//! # }
//! ```

mod catalog;
mod descriptor;
mod error;
mod loader;
pub mod maritime;

pub use catalog::{Catalog, CatalogBuilder, SearchQuery, ToolFn};
pub use descriptor::{Arguments, ParamKind, ParamSpec, ToolDescriptor, ToolFailure, ToolRef};
pub use error::{Error, Result};
pub use loader::{ToolBinding, ToolLoader};
