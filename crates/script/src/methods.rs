//! Methods on builtin values.

use crate::error::{ExcKind, Exception, Result};
use crate::format::format_value;
use crate::host::CallArgs;
use crate::interp::Interpreter;
use crate::value::{Value, norm_index};

const STR_METHODS: &[&str] = &[
    "lower",
    "upper",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "splitlines",
    "join",
    "startswith",
    "endswith",
    "replace",
    "find",
    "index",
    "count",
    "title",
    "capitalize",
    "isdigit",
    "isalpha",
    "isalnum",
    "isspace",
    "format",
    "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get",
    "keys",
    "values",
    "items",
    "update",
    "pop",
    "setdefault",
    "copy",
    "clear",
];

const TUPLE_METHODS: &[&str] = &["index", "count"];

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

impl Interpreter<'_> {
    pub(crate) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: CallArgs,
    ) -> Result<Value> {
        match receiver {
            Value::Str(s) => self.str_method(s, name, args),
            Value::List(_) => self.list_method(receiver, name, args),
            Value::Dict(_) => self.dict_method(receiver, name, args),
            Value::Tuple(items) => {
                let qualified = format!("tuple.{name}");
                let [x] = args.bind(&qualified, ["value"], 1)?;
                let x = x.unwrap_or_default();
                match name {
                    "index" => items
                        .iter()
                        .position(|v| v.py_eq(&x))
                        .map(|i| Value::Int(i as i64))
                        .ok_or_else(|| Exception::value_error("tuple.index(x): x not in tuple")),
                    _ => Ok(Value::Int(items.iter().filter(|v| v.py_eq(&x)).count() as i64)),
                }
            }
            other => Err(no_attribute(other, name)),
        }
    }

    fn str_method(&mut self, s: &str, name: &str, args: CallArgs) -> Result<Value> {
        let qualified = format!("str.{name}");
        let func = qualified.as_str();
        match name {
            "lower" | "upper" | "title" | "capitalize" | "isdigit" | "isalpha" | "isalnum"
            | "isspace" | "splitlines" => {
                args.bind(func, [], 0)?;
                Ok(match name {
                    "lower" => Value::str(s.to_lowercase()),
                    "upper" => Value::str(s.to_uppercase()),
                    "title" => Value::str(title(s)),
                    "capitalize" => {
                        let mut chars = s.chars();
                        let text: String = match chars.next() {
                            Some(first) => {
                                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                            }
                            None => String::new(),
                        };
                        Value::str(text)
                    }
                    "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
                    "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
                    "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
                    "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
                    _ => Value::list(s.lines().map(Value::str).collect()),
                })
            }
            "strip" | "lstrip" | "rstrip" => {
                let [chars] = args.bind(func, ["chars"], 0)?;
                let set: Option<Vec<char>> = match chars {
                    None | Some(Value::None) => None,
                    Some(Value::Str(c)) => Some(c.chars().collect()),
                    Some(other) => return Err(str_arg(func, &other)),
                };
                let matches = |c: char| match &set {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                let out = match name {
                    "strip" => s.trim_matches(matches),
                    "lstrip" => s.trim_start_matches(matches),
                    _ => s.trim_end_matches(matches),
                };
                Ok(Value::str(out))
            }
            "split" => {
                let [sep, maxsplit] = args.bind(func, ["sep", "maxsplit"], 0)?;
                let limit = match maxsplit {
                    None => None,
                    Some(v) => {
                        let n = v.as_int().ok_or_else(|| str_arg(func, &v))?;
                        usize::try_from(n).ok()
                    }
                };
                let parts: Vec<Value> = match sep {
                    None | Some(Value::None) => split_whitespace(s, limit),
                    Some(Value::Str(sep)) => {
                        if sep.is_empty() {
                            return Err(Exception::value_error("empty separator"));
                        }
                        match limit {
                            Some(n) => s.splitn(n + 1, &*sep).map(Value::str).collect(),
                            None => s.split(&*sep).map(Value::str).collect(),
                        }
                    }
                    Some(other) => return Err(str_arg(func, &other)),
                };
                self.check_len(parts.len())?;
                Ok(Value::list(parts))
            }
            "join" => {
                let [iterable] = args.bind(func, ["iterable"], 1)?;
                let mut pieces = Vec::new();
                for (i, item) in self.collect(&iterable.unwrap_or_default())?.into_iter().enumerate() {
                    match item {
                        Value::Str(piece) => pieces.push(piece),
                        other => {
                            return Err(Exception::type_error(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            )));
                        }
                    }
                }
                let total: usize = pieces.iter().map(|p| p.len()).sum::<usize>()
                    + s.len() * pieces.len().saturating_sub(1);
                self.check_str(total)?;
                let pieces: Vec<&str> = pieces.iter().map(|p| &**p).collect();
                Ok(Value::str(pieces.join(s)))
            }
            "startswith" | "endswith" => {
                let [prefix] = args.bind(func, ["prefix"], 1)?;
                let candidates: Vec<Value> = match prefix.unwrap_or_default() {
                    Value::Tuple(items) => items.to_vec(),
                    other => vec![other],
                };
                for candidate in candidates {
                    let Value::Str(c) = &candidate else {
                        return Err(str_arg(func, &candidate));
                    };
                    let hit = if name == "startswith" {
                        s.starts_with(&**c)
                    } else {
                        s.ends_with(&**c)
                    };
                    if hit {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "replace" => {
                let [old, new, count] = args.bind(func, ["old", "new", "count"], 2)?;
                let old = str_value(func, old)?;
                let new = str_value(func, new)?;
                let count = match count {
                    Some(v) => v.as_int().ok_or_else(|| str_arg(func, &v))?,
                    None => -1,
                };
                let occurrences = if old.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(&*old).count()
                };
                let replaced = match usize::try_from(count) {
                    Ok(n) => n.min(occurrences),
                    Err(_) => occurrences,
                };
                let grown = s.len() + replaced * new.len();
                self.check_str(grown)?;
                Ok(Value::str(s.replacen(&*old, &new, replaced)))
            }
            "find" | "index" | "count" => {
                let [sub] = args.bind(func, ["sub"], 1)?;
                let sub = str_value(func, sub)?;
                if name == "count" {
                    let n = if sub.is_empty() {
                        s.chars().count() + 1
                    } else {
                        s.matches(&*sub).count()
                    };
                    return Ok(Value::Int(n as i64));
                }
                match s.find(&*sub) {
                    Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
                    None if name == "find" => Ok(Value::Int(-1)),
                    None => Err(Exception::value_error("substring not found")),
                }
            }
            "zfill" => {
                let [width] = args.bind(func, ["width"], 1)?;
                let width = width.unwrap_or_default();
                let width = width.as_int().ok_or_else(|| str_arg(func, &width))?;
                let width = usize::try_from(width).unwrap_or(0);
                self.check_str(width)?;
                let len = s.chars().count();
                if len >= width {
                    return Ok(Value::str(s));
                }
                let (sign, digits) = match s.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                    _ => (String::new(), s),
                };
                Ok(Value::str(format!("{sign}{}{digits}", "0".repeat(width - len))))
            }
            "format" => {
                let text = self.str_format(s, args)?;
                Ok(Value::str(text))
            }
            _ => Err(no_attribute(&Value::str(s), name)),
        }
    }

    /// `str.format`: `{}`, `{0}`, `{name}`, with optional `!r`/`!s` and a spec.
    fn str_format(&mut self, template: &str, args: CallArgs) -> Result<String> {
        let mut out = String::new();
        let mut auto = 0usize;
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => {
                    return Err(Exception::value_error(
                        "Single '}' encountered in format string",
                    ));
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => field.push(c),
                            None => {
                                return Err(Exception::value_error(
                                    "Single '{' encountered in format string",
                                ));
                            }
                        }
                    }
                    let (head, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                    let (key, conversion) = match head.split_once('!') {
                        Some((key, conv)) => (key, Some(conv)),
                        None => (head, None),
                    };
                    let value = if key.is_empty() {
                        let value = args.positional.get(auto).cloned();
                        auto += 1;
                        value.ok_or_else(|| {
                            Exception::new(
                                ExcKind::IndexError,
                                format!("Replacement index {} out of range", auto - 1),
                            )
                        })?
                    } else if let Ok(i) = key.parse::<usize>() {
                        args.positional.get(i).cloned().ok_or_else(|| {
                            Exception::new(
                                ExcKind::IndexError,
                                format!("Replacement index {i} out of range"),
                            )
                        })?
                    } else {
                        args.keywords
                            .iter()
                            .find(|(k, _)| k == key)
                            .map(|(_, v)| v.clone())
                            .ok_or_else(|| Exception::new(ExcKind::KeyError, format!("'{key}'")))?
                    };
                    let value = match conversion {
                        None => value,
                        Some("r") => Value::str(value.repr()),
                        Some("s") => Value::str(value.to_str()),
                        Some(other) => {
                            return Err(Exception::value_error(format!(
                                "Unknown conversion specifier {other}"
                            )));
                        }
                    };
                    out.push_str(&format_value(&value, spec)?);
                    self.check_str(out.len())?;
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }

    fn list_method(&mut self, receiver: &Value, name: &str, args: CallArgs) -> Result<Value> {
        let Value::List(items) = receiver else {
            return Err(no_attribute(receiver, name));
        };
        let qualified = format!("list.{name}");
        let func = qualified.as_str();
        match name {
            "append" => {
                let [x] = args.bind(func, ["object"], 1)?;
                self.check_len(items.borrow().len() + 1)?;
                items.borrow_mut().push(x.unwrap_or_default());
                Ok(Value::None)
            }
            "extend" => {
                let [iterable] = args.bind(func, ["iterable"], 1)?;
                let extra = self.collect(&iterable.unwrap_or_default())?;
                self.check_len(items.borrow().len() + extra.len())?;
                items.borrow_mut().extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                let [index, x] = args.bind(func, ["index", "object"], 2)?;
                let index = index.unwrap_or_default();
                let i = index.as_int().ok_or_else(|| str_arg(func, &index))?;
                let len = items.borrow().len();
                self.check_len(len + 1)?;
                let len_i = len as i64;
                let pos = if i < 0 { (i + len_i).max(0) } else { i.min(len_i) };
                items.borrow_mut().insert(pos as usize, x.unwrap_or_default());
                Ok(Value::None)
            }
            "pop" => {
                let [index] = args.bind(func, ["index"], 0)?;
                let i = match index {
                    Some(v) => v.as_int().ok_or_else(|| str_arg(func, &v))?,
                    None => -1,
                };
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    return Err(Exception::new(ExcKind::IndexError, "pop from empty list"));
                }
                let pos = norm_index(i, items.len())
                    .ok_or_else(|| Exception::new(ExcKind::IndexError, "pop index out of range"))?;
                Ok(items.remove(pos))
            }
            "remove" => {
                let [x] = args.bind(func, ["value"], 1)?;
                let x = x.unwrap_or_default();
                let pos = items.borrow().iter().position(|v| v.py_eq(&x));
                match pos {
                    Some(pos) => {
                        items.borrow_mut().remove(pos);
                        Ok(Value::None)
                    }
                    None => Err(Exception::value_error("list.remove(x): x not in list")),
                }
            }
            "index" => {
                let [x] = args.bind(func, ["value"], 1)?;
                let x = x.unwrap_or_default();
                let pos = items.borrow().iter().position(|v| v.py_eq(&x));
                pos.map(|i| Value::Int(i as i64)).ok_or_else(|| {
                    Exception::value_error(format!("{} is not in list", x.repr()))
                })
            }
            "count" => {
                let [x] = args.bind(func, ["value"], 1)?;
                let x = x.unwrap_or_default();
                let n = items.borrow().iter().filter(|v| v.py_eq(&x)).count();
                Ok(Value::Int(n as i64))
            }
            "sort" => {
                if !args.positional.is_empty() {
                    return Err(Exception::type_error("sort() takes no positional arguments"));
                }
                let [key, reverse] = args.bind(func, ["key", "reverse"], 0)?;
                let current = items.borrow().clone();
                let key = key.filter(|k| !k.is_none());
                let sorted = self.sort_values(current, key, reverse.is_some_and(|r| r.truthy()))?;
                *items.borrow_mut() = sorted;
                Ok(Value::None)
            }
            "reverse" | "copy" | "clear" => {
                args.bind(func, [], 0)?;
                match name {
                    "reverse" => items.borrow_mut().reverse(),
                    "clear" => items.borrow_mut().clear(),
                    _ => return Ok(Value::list(items.borrow().clone())),
                }
                Ok(Value::None)
            }
            _ => Err(no_attribute(receiver, name)),
        }
    }

    fn dict_method(&mut self, receiver: &Value, name: &str, mut args: CallArgs) -> Result<Value> {
        let Value::Dict(dict) = receiver else {
            return Err(no_attribute(receiver, name));
        };
        let qualified = format!("dict.{name}");
        let func = qualified.as_str();
        match name {
            "get" => {
                let [key, default] = args.bind(func, ["key", "default"], 1)?;
                let key = key.unwrap_or_default();
                let found = dict.borrow().get(&key)?.cloned();
                Ok(found.or(default).unwrap_or_default())
            }
            "clear" => {
                args.bind(func, [], 0)?;
                dict.borrow_mut().clear();
                Ok(Value::None)
            }
            "keys" | "values" | "items" | "copy" => {
                args.bind(func, [], 0)?;
                let d = dict.borrow();
                Ok(match name {
                    "keys" => Value::list(d.keys()),
                    "values" => Value::list(d.values()),
                    "items" => Value::list(d.items()),
                    _ => Value::dict(d.clone()),
                })
            }
            "update" => {
                let keywords = std::mem::take(&mut args.keywords);
                let [source] = args.bind(func, ["other"], 0)?;
                let mut merged = dict.borrow().clone();
                if let Some(source) = source {
                    self.update_dict(&mut merged, &source)?;
                }
                for (k, v) in keywords {
                    merged.insert(Value::str(k), v)?;
                }
                self.check_len(merged.len())?;
                *dict.borrow_mut() = merged;
                Ok(Value::None)
            }
            "pop" => {
                let [key, default] = args.bind(func, ["key", "default"], 1)?;
                let key = key.unwrap_or_default();
                let removed = dict.borrow_mut().remove(&key)?;
                match (removed, default) {
                    (Some(v), _) => Ok(v),
                    (None, Some(d)) => Ok(d),
                    (None, None) => Err(Exception::new(ExcKind::KeyError, key.repr())),
                }
            }
            "setdefault" => {
                let [key, default] = args.bind(func, ["key", "default"], 1)?;
                let key = key.unwrap_or_default();
                if let Some(v) = dict.borrow().get(&key)?.cloned() {
                    return Ok(v);
                }
                let value = default.unwrap_or_default();
                self.check_len(dict.borrow().len() + 1)?;
                dict.borrow_mut().insert(key, value.clone())?;
                Ok(value)
            }
            _ => Err(no_attribute(receiver, name)),
        }
    }
}

fn no_attribute(value: &Value, name: &str) -> Exception {
    Exception::new(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", value.type_name()),
    )
}

fn str_arg(func: &str, value: &Value) -> Exception {
    Exception::type_error(format!(
        "{func}() got an argument of the wrong type: '{}'",
        value.type_name()
    ))
}

fn str_value(func: &str, value: Option<Value>) -> Result<std::rc::Rc<str>> {
    match value {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(str_arg(func, &other)),
        None => Err(Exception::type_error(format!("{func}() missing argument"))),
    }
}

fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<Value> {
    let Some(limit) = limit else {
        return s.split_whitespace().map(Value::str).collect();
    };
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if out.len() == limit {
            out.push(Value::str(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(Value::str(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
