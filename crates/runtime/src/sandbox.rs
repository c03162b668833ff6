//! Runs one snippet against one session.

use std::any::Any;
use std::thread;

use catalog::{ToolLoader, ToolRef};
use policy::Policy;
use script::{Interpreter, from_json, to_json};
use serde_json::{Map, Value as Json};
use storage::SessionState;

use crate::host::SandboxHost;
use crate::{Error, Result, RuntimeConfig};

/// The interpreter recurses on nested expressions and calls.
const INTERPRETER_STACK_BYTES: usize = 32 * 1024 * 1024;

/// What one snippet run produced. Output and tool usage are kept even when
/// the run fails.
#[derive(Debug)]
pub(crate) struct Run {
    pub(crate) result: Result<Json>,
    pub(crate) stdout: String,
    pub(crate) tools_used: Vec<ToolRef>,
    pub(crate) raw_output_chars: usize,
}

impl Run {
    pub(crate) fn failed(err: Error) -> Self {
        Self {
            result: Err(err),
            stdout: String::new(),
            tools_used: Vec::new(),
            raw_output_chars: 0,
        }
    }
}

/// Parse and run `code` on a dedicated thread. Panics become failures.
///
/// Code over the size limit is refused before parsing. `context` entries are
/// seeded as globals, so they shadow primitives of the same name.
pub(crate) fn run(
    code: &str,
    context: &Map<String, Json>,
    session: &mut SessionState,
    loader: &ToolLoader,
    policy: &Policy,
    config: &RuntimeConfig,
) -> Run {
    if code.len() > config.max_code_bytes {
        return Run::failed(Error::CodeTooLong {
            size: code.len(),
            limit: config.max_code_bytes,
        });
    }
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("mcpx-sandbox".into())
            .stack_size(INTERPRETER_STACK_BYTES)
            .spawn_scoped(scope, || interpret(code, context, session, loader, policy, config));
        match worker {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|panic| Run::failed(Error::Crashed(panic_message(&*panic)))),
            Err(e) => Run::failed(Error::Crashed(format!("could not start sandbox thread: {e}"))),
        }
    })
}

/// Syntax trees and values are single-threaded, so parsing happens on the
/// worker too.
fn interpret(
    code: &str,
    context: &Map<String, Json>,
    session: &mut SessionState,
    loader: &ToolLoader,
    policy: &Policy,
    config: &RuntimeConfig,
) -> Run {
    let program = match script::parse(code) {
        Ok(program) => program,
        Err(exc) => return Run::failed(exc.into()),
    };
    let mut host = SandboxHost::new(loader, policy, session);
    let (result, stdout) = {
        let mut interp = Interpreter::new(&mut host, config.limits());
        SandboxHost::install(policy, &mut interp);
        for (name, value) in context {
            interp.set_global(name, from_json(value));
        }
        let result = interp.run(&program).and_then(|()| {
            let value = interp.global("result").unwrap_or_default();
            to_json(&value)
        });
        (result, interp.stdout().to_string())
    };
    Run {
        result: result.map_err(Error::from),
        stdout,
        tools_used: host.tools_used,
        raw_output_chars: host.raw_output_chars,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
