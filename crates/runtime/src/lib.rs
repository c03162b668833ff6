//! mcpx runtime: sandboxed snippet execution over a tool catalog.
//!
//! A caller hands the [`Runtime`] a short Python-style snippet. The snippet
//! discovers tools, loads the ones it needs, calls them, filters and
//! aggregates the results locally, and binds a compact `result`. Only that
//! result (plus captured `print` output) travels back, which is where the
//! token savings come from.
//!
//! # Overview
//!
//! - **Runtime**: owns the catalog, the policy, the session store and the
//!   counters. Safe to share across threads.
//! - **Sessions**: named key/value state that outlives a single execution.
//!   Calls on one session are served in arrival order.
//! - **Sandbox**: each execution runs on its own thread with a step budget,
//!   a cooperative deadline and a recursion limit. Code mentioning forbidden
//!   calls such as `eval(` or `os.system` is refused before parsing.
//! - **Privacy**: optionally tokenizes PII in everything an execution
//!   returns; [`Runtime::detokenize`] reverses it.
//!
//! # Example
//!
//! ```
//! use runtime::Runtime;
//!
//! # fn main() -> catalog::Result<()> {
//! let rt = Runtime::with_catalog(catalog::maritime::catalog()?);
//! let out = rt.execute_code(
//!     r#"
//! track = load_tool("maritime-data", "vessel_tracking")
//! vessels = track(region="north_sea")
//! result = {"count": len(vessels)}
//! "#,
//!     Some("demo"),
//! );
//! assert!(out.success, "{:?}", out.error);
//! assert_eq!(out.result["count"], 3);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod host;
mod metrics;
mod privacy;
mod runtime;
mod sandbox;
mod validator;

pub use config::{BusyPolicy, RuntimeConfig};
pub use error::{Error, ErrorKind, Result};
pub use metrics::{CHARS_PER_TOKEN, Metrics, TokenEstimator};
pub use privacy::{PiiKind, PrivacyFilter, REDACTED};
pub use runtime::{ExecutionRequest, ExecutionResult, Runtime};
