//! The seam between the interpreter and whoever embeds it.

use std::rc::Rc;

use crate::error::{Exception, Result};
use crate::value::Value;

/// A callable owned by the host.
///
/// The interpreter never looks inside one; calling it hands the `HostFn` and
/// the arguments back to [`Host::call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFn {
    pub name: Rc<str>,
    pub handle: usize,
}

impl HostFn {
    pub fn new(name: impl Into<Rc<str>>, handle: usize) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

/// Implemented by the embedder to give snippets access to the outside world.
pub trait Host {
    fn call(&mut self, func: &HostFn, args: CallArgs) -> Result<Value>;
}

/// Arguments of a single call, as written at the call site.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    pub fn with_keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keywords.push((name.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Remove a keyword argument by name.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(pos).1)
    }

    /// The positional arguments, failing if any keyword is left over.
    pub fn into_positional(self, func: &str) -> Result<Vec<Value>> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(Exception::type_error(format!(
                "{func}() got an unexpected keyword argument '{name}'"
            )));
        }
        Ok(self.positional)
    }

    /// Match arguments to named parameters.
    ///
    /// The first `required` parameters must be supplied; the rest come back as
    /// `None` when omitted.
    pub fn bind<const N: usize>(
        self,
        func: &str,
        params: [&str; N],
        required: usize,
    ) -> Result<[Option<Value>; N]> {
        let CallArgs {
            positional,
            keywords,
        } = self;

        if positional.len() > N {
            let message = if N == 0 {
                format!("{func}() takes no arguments ({} given)", positional.len())
            } else {
                format!(
                    "{func}() takes at most {N} arguments ({} given)",
                    positional.len()
                )
            };
            return Err(Exception::type_error(message));
        }

        let mut slots: [Option<Value>; N] = std::array::from_fn(|_| None);
        for (slot, value) in slots.iter_mut().zip(positional) {
            *slot = Some(value);
        }

        for (name, value) in keywords {
            match params.iter().position(|p| *p == name) {
                Some(i) if slots[i].is_none() => slots[i] = Some(value),
                Some(_) => {
                    return Err(Exception::type_error(format!(
                        "{func}() got multiple values for argument '{name}'"
                    )));
                }
                None => {
                    return Err(Exception::type_error(format!(
                        "{func}() got an unexpected keyword argument '{name}'"
                    )));
                }
            }
        }

        if let Some(i) = slots[..required.min(N)].iter().position(Option::is_none) {
            return Err(Exception::type_error(format!(
                "{func}() missing required argument '{}'",
                params[i]
            )));
        }
        Ok(slots)
    }
}

/// Host with nothing to offer. Every call fails.
#[cfg(test)]
pub(crate) struct NoHost;

#[cfg(test)]
impl Host for NoHost {
    fn call(&mut self, func: &HostFn, _args: CallArgs) -> Result<Value> {
        Err(Exception::new(
            crate::error::ExcKind::RuntimeError,
            format!("no host function {}", func.name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_mixes_positional_and_keywords() {
        let args = CallArgs::positional(vec![Value::Int(1)]).with_keyword("c", Value::Int(3));
        let [a, b, c] = args.bind("f", ["a", "b", "c"], 1).unwrap();
        assert!(matches!(a, Some(Value::Int(1))));
        assert!(b.is_none());
        assert!(matches!(c, Some(Value::Int(3))));
    }

    #[test]
    fn bind_reports_missing_argument() {
        let err = CallArgs::new().bind("load_tool", ["server", "name"], 2).unwrap_err();
        assert_eq!(err.message, "load_tool() missing required argument 'server'");
    }

    #[test]
    fn bind_rejects_unknown_keyword() {
        let args = CallArgs::new().with_keyword("bogus", Value::None);
        let err = args.bind("f", ["a"], 0).unwrap_err();
        assert!(err.message.contains("unexpected keyword argument 'bogus'"));
    }

    #[test]
    fn bind_rejects_duplicate_argument() {
        let args = CallArgs::positional(vec![Value::Int(1)]).with_keyword("a", Value::Int(2));
        assert!(args.bind("f", ["a"], 1).is_err());
    }
}
