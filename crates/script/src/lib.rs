//! A small Python-subset interpreter for sandboxed snippets.
//!
//! Snippets are parsed into a [`Program`] and run by an [`Interpreter`].
//! The interpreter has no filesystem, network, process or import access; the
//! only way out is through [`Host`] functions the embedder binds by name.
//!
//! Every run is bounded by [`Limits`]: a wall-clock deadline and optional
//! step budget, a call-depth limit, and caps on collection, string and
//! output sizes. Hitting one raises an exception that `try`/`except` cannot
//! swallow.
//!
//! # Example
//!
//! ```
//! use script::{Interpreter, Limits, parse, to_json};
//!
//! # fn main() -> script::Result<()> {
//! struct NoTools;
//! impl script::Host for NoTools {
//!     fn call(&mut self, func: &script::HostFn, _args: script::CallArgs) -> script::Result<script::Value> {
//!         Err(script::Exception::new(script::ExcKind::RuntimeError, format!("{} unavailable", func.name)))
//!     }
//! }
//!
//! let program = parse("result = {'total': sum(x * x for x in range(4))}")?;
//! let mut host = NoTools;
//! let mut interp = Interpreter::new(&mut host, Limits::default());
//! interp.run(&program)?;
//! let result = interp.global("result").unwrap_or_default();
//! assert_eq!(to_json(&result)?, serde_json::json!({"total": 14}));
//! # Ok(())
//! # }
//! ```

mod ast;
mod builtins;
mod error;
mod format;
mod host;
mod interp;
mod json;
mod lexer;
mod methods;
mod parser;
mod value;

pub use error::{ExcKind, Exception, Result};
pub use format::format_value;
pub use host::{CallArgs, Host, HostFn};
pub use interp::{Interpreter, Limits};
pub use json::{from_json, to_json};
pub use parser::{Program, parse};
pub use value::{Dict, Value};
