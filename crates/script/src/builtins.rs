//! Builtin functions and type constructors.

use std::cmp::Ordering;

use crate::ast::BinOp;
use crate::error::{ExcKind, Exception, Result};
use crate::host::CallArgs;
use crate::interp::Interpreter;
use crate::value::{Builtin, Dict, Num, Range, Type, Value};

impl Interpreter<'_> {
    pub(crate) fn call_builtin(&mut self, builtin: Builtin, mut args: CallArgs) -> Result<Value> {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let sep = text_option(args.take_keyword("sep"), " ", "sep")?;
                let end = text_option(args.take_keyword("end"), "\n", "end")?;
                let values = args.into_positional(name)?;
                let mut line = values
                    .iter()
                    .map(Value::to_str)
                    .collect::<Vec<_>>()
                    .join(&sep);
                line.push_str(&end);
                self.write(&line);
                Ok(Value::None)
            }
            Builtin::Len => {
                let [value] = args.bind(name, ["obj"], 1)?;
                let value = value.unwrap_or_default();
                let len = match &value {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Tuple(items) => items.len(),
                    Value::Dict(dict) => dict.borrow().len(),
                    Value::Range(r) => r.len(),
                    other => {
                        return Err(Exception::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Builtin::Abs => {
                let [value] = args.bind(name, ["x"], 1)?;
                let value = value.unwrap_or_default();
                match value.as_num() {
                    Some(Num::Int(i)) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                        Exception::new(ExcKind::OverflowError, "integer overflow")
                    }),
                    Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
                    None => Err(Exception::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        value.type_name()
                    ))),
                }
            }
            Builtin::Min | Builtin::Max => self.extremum(builtin, args),
            Builtin::Sum => {
                let [iterable, start] = args.bind(name, ["iterable", "start"], 1)?;
                let mut total = start.unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return Err(Exception::type_error(
                        "sum() can't sum strings [use ''.join(seq) instead]",
                    ));
                }
                for item in self.iter(&iterable.unwrap_or_default())? {
                    self.tick()?;
                    total = self.binary(BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            Builtin::Sorted => {
                let [iterable, key, reverse] =
                    args.bind(name, ["iterable", "key", "reverse"], 1)?;
                let items = self.collect(&iterable.unwrap_or_default())?;
                let key = key.filter(|k| !k.is_none());
                let reverse = reverse.is_some_and(|r| r.truthy());
                Ok(Value::list(self.sort_values(items, key, reverse)?))
            }
            Builtin::Reversed => {
                let [seq] = args.bind(name, ["sequence"], 1)?;
                let seq = seq.unwrap_or_default();
                if matches!(seq, Value::Dict(_)) {
                    return Err(Exception::type_error("'dict' object is not reversible"));
                }
                let mut items = self.collect(&seq)?;
                items.reverse();
                Ok(Value::list(items))
            }
            Builtin::Enumerate => {
                let [iterable, start] = args.bind(name, ["iterable", "start"], 1)?;
                let start = match start {
                    Some(v) => v.as_int().ok_or_else(|| {
                        Exception::type_error("enumerate() start must be an integer")
                    })?,
                    None => 0,
                };
                let items = self.collect(&iterable.unwrap_or_default())?;
                Ok(Value::list(
                    items
                        .into_iter()
                        .zip(start..)
                        .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
                        .collect(),
                ))
            }
            Builtin::Zip => {
                let iterables = args.into_positional(name)?;
                let mut columns = Vec::with_capacity(iterables.len());
                for it in &iterables {
                    columns.push(self.collect(it)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let rows = (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect();
                Ok(Value::list(rows))
            }
            Builtin::Map => {
                let mut values = args.into_positional(name)?;
                if values.len() < 2 {
                    return Err(Exception::type_error(
                        "map() must have at least two arguments.",
                    ));
                }
                let func = values.remove(0);
                let mut columns = Vec::with_capacity(values.len());
                for it in &values {
                    columns.push(self.collect(it)?);
                }
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(len);
                for i in 0..len {
                    let call = CallArgs::positional(columns.iter().map(|c| c[i].clone()).collect());
                    out.push(self.call(&func, call)?);
                }
                Ok(Value::list(out))
            }
            Builtin::Filter => {
                let [func, iterable] = args.bind(name, ["function", "iterable"], 2)?;
                let func = func.unwrap_or_default();
                let mut out = Vec::new();
                for item in self.collect(&iterable.unwrap_or_default())? {
                    let keep = if func.is_none() {
                        item.truthy()
                    } else {
                        self.call(&func, CallArgs::positional(vec![item.clone()]))?
                            .truthy()
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::list(out))
            }
            Builtin::Any | Builtin::All => {
                let [iterable] = args.bind(name, ["iterable"], 1)?;
                let want = builtin == Builtin::Any;
                for item in self.iter(&iterable.unwrap_or_default())? {
                    self.tick()?;
                    if item.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            Builtin::Round => {
                let [number, ndigits] = args.bind(name, ["number", "ndigits"], 1)?;
                let number = number.unwrap_or_default();
                let ndigits = match ndigits {
                    None | Some(Value::None) => None,
                    Some(v) => Some(v.as_int().ok_or_else(|| {
                        Exception::type_error("'ndigits' must be an integer")
                    })?),
                };
                round(&number, ndigits)
            }
        }
    }

    fn extremum(&mut self, builtin: Builtin, mut args: CallArgs) -> Result<Value> {
        let name = builtin.name();
        let key = args.take_keyword("key").filter(|k| !k.is_none());
        let default = args.take_keyword("default");
        let mut values = args.into_positional(name)?;
        let items = match values.len() {
            0 => {
                return Err(Exception::type_error(format!(
                    "{name} expected at least 1 argument, got 0"
                )));
            }
            1 => self.collect(&values.remove(0))?,
            _ => {
                if default.is_some() {
                    return Err(Exception::type_error(format!(
                        "Cannot specify a default for {name}() with multiple positional arguments"
                    )));
                }
                values
            }
        };
        let want = if builtin == Builtin::Min {
            Ordering::Less
        } else {
            Ordering::Greater
        };

        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let k = match &key {
                Some(f) => self.call(f, CallArgs::positional(vec![item.clone()]))?,
                None => item.clone(),
            };
            let better = match &best {
                None => true,
                Some((best_key, _)) => order(&k, best_key)? == want,
            };
            if better {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(Exception::value_error(format!(
                "{name}() iterable argument is empty"
            ))),
        }
    }

    /// Stable sort, optionally by a key function.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        let keys = match &key {
            Some(f) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call(f, CallArgs::positional(vec![item.clone()]))?);
                }
                keys
            }
            None => items.clone(),
        };

        let mut failure = None;
        let mut order_idx: Vec<usize> = (0..items.len()).collect();
        order_idx.sort_by(|&a, &b| match order(&keys[a], &keys[b]) {
            Ok(o) if reverse => o.reverse(),
            Ok(o) => o,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(order_idx.into_iter().map(|i| items[i].clone()).collect())
    }

    /// Calling a type object: `int("3")`, `list(range(3))`, `type(x)`.
    pub(crate) fn construct(&mut self, ty: Type, mut args: CallArgs) -> Result<Value> {
        let name = ty.name();
        match ty {
            Type::Int => {
                let [value, base] = args.bind(name, ["x", "base"], 0)?;
                let Some(value) = value else {
                    return Ok(Value::Int(0));
                };
                if let Some(base) = base {
                    let Value::Str(s) = &value else {
                        return Err(Exception::type_error(
                            "int() can't convert non-string with explicit base",
                        ));
                    };
                    let base = base
                        .as_int()
                        .filter(|b| (2..=36).contains(b))
                        .ok_or_else(|| Exception::value_error("int() base must be >= 2 and <= 36"))?;
                    return parse_int(s, base as u32);
                }
                to_int(&value)
            }
            Type::Float => {
                let [value] = args.bind(name, ["x"], 0)?;
                match value {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => parse_float(&s).map(Value::Float),
                    Some(v) => v.as_f64().map(Value::Float).ok_or_else(|| {
                        Exception::type_error(format!(
                            "float() argument must be a string or a real number, not '{}'",
                            v.type_name()
                        ))
                    }),
                }
            }
            Type::Str => {
                let [value] = args.bind(name, ["object"], 0)?;
                Ok(Value::str(value.map(|v| v.to_str()).unwrap_or_default()))
            }
            Type::Bool => {
                let [value] = args.bind(name, ["x"], 0)?;
                Ok(Value::Bool(value.is_some_and(|v| v.truthy())))
            }
            Type::List => {
                let [value] = args.bind(name, ["iterable"], 0)?;
                match value {
                    Some(v) => Ok(Value::list(self.collect(&v)?)),
                    None => Ok(Value::list(Vec::new())),
                }
            }
            Type::Tuple => {
                let [value] = args.bind(name, ["iterable"], 0)?;
                match value {
                    Some(v) => Ok(Value::tuple(self.collect(&v)?)),
                    None => Ok(Value::tuple(Vec::new())),
                }
            }
            Type::Dict => {
                let keywords = std::mem::take(&mut args.keywords);
                let [source] = args.bind(name, ["mapping"], 0)?;
                let mut dict = Dict::new();
                if let Some(source) = source {
                    self.update_dict(&mut dict, &source)?;
                }
                for (k, v) in keywords {
                    dict.insert(Value::str(k), v)?;
                }
                Ok(Value::dict(dict))
            }
            Type::Range => {
                let values = args.into_positional(name)?;
                let ints = values
                    .iter()
                    .map(|v| {
                        v.as_int().ok_or_else(|| {
                            Exception::type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                v.type_name()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => {
                        return Err(Exception::type_error(format!(
                            "range expected 1 to 3 arguments, got {}",
                            ints.len()
                        )));
                    }
                };
                if step == 0 {
                    return Err(Exception::value_error("range() arg 3 must not be zero"));
                }
                Ok(Value::Range(Range { start, stop, step }))
            }
            Type::Type => {
                let [value] = args.bind(name, ["object"], 1)?;
                Ok(match value.unwrap_or_default() {
                    Value::Exception(e) => Value::Class(e.kind),
                    other => Value::Type(Type::of(&other)),
                })
            }
            Type::NoneType | Type::Function | Type::BuiltinFunction => Err(
                Exception::type_error(format!("cannot create '{name}' instances")),
            ),
        }
    }

    /// Merge a mapping or an iterable of pairs into `dict`.
    pub(crate) fn update_dict(&mut self, dict: &mut Dict, source: &Value) -> Result<()> {
        if let Value::Dict(other) = source {
            let entries: Vec<(Value, Value)> = other.borrow().iter().cloned().collect();
            for (k, v) in entries {
                dict.insert(k, v)?;
            }
        } else {
            for (i, pair) in self.collect(source)?.into_iter().enumerate() {
                let pair = self.collect(&pair)?;
                let [k, v] = <[Value; 2]>::try_from(pair).map_err(|p| {
                    Exception::value_error(format!(
                        "dictionary update sequence element #{i} has length {}; 2 is required",
                        p.len()
                    ))
                })?;
                dict.insert(k, v)?;
            }
        }
        self.check_len(dict.len())
    }
}

fn text_option(value: Option<Value>, default: &str, what: &str) -> Result<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(Exception::type_error(format!(
            "{what} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

/// Ordering for sorting and `min`/`max`. Unordered floats (NaN) count as equal.
fn order(a: &Value, b: &Value) -> Result<Ordering> {
    if let (Some(x), Some(y)) = (a.as_num(), b.as_num()) {
        return Ok(x.cmp(y).unwrap_or(Ordering::Equal));
    }
    a.partial_order(b).ok_or_else(|| {
        Exception::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            b.type_name(),
            a.type_name()
        ))
    })
}

fn to_int(value: &Value) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => {
            if f.is_nan() {
                return Err(Exception::value_error("cannot convert float NaN to integer"));
            }
            let t = f.trunc();
            if t.is_infinite() || t >= 9.223_372_036_854_776e18 || t < -9.223_372_036_854_776e18 {
                return Err(Exception::new(
                    ExcKind::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            Ok(Value::Int(t as i64))
        }
        Value::Str(s) => parse_int(s, 10),
        other => Err(Exception::type_error(format!(
            "int() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_int(text: &str, base: u32) -> Result<Value> {
    let invalid = || {
        Exception::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    let magnitude = u64::from_str_radix(&cleaned, base).map_err(|_| invalid())?;
    let value = if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    };
    value
        .map(Value::Int)
        .ok_or_else(|| Exception::new(ExcKind::OverflowError, "integer overflow"))
}

fn parse_float(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let unsigned = lowered.trim_start_matches(['+', '-']);
    let special = matches!(unsigned, "inf" | "infinity" | "nan");
    let parsed = if special {
        lowered.parse::<f64>().ok()
    } else if trimmed.chars().all(|c| c.is_ascii_digit() || "+-.eE_".contains(c))
        && !trimmed.is_empty()
    {
        trimmed.replace('_', "").parse::<f64>().ok()
    } else {
        None
    };
    parsed.ok_or_else(|| {
        Exception::value_error(format!(
            "could not convert string to float: {}",
            Value::str(text).repr()
        ))
    })
}

fn round(number: &Value, ndigits: Option<i64>) -> Result<Value> {
    match (number.as_num(), ndigits) {
        (Some(Num::Int(i)), None) => Ok(Value::Int(i)),
        (Some(Num::Int(i)), Some(n)) if n >= 0 => Ok(Value::Int(i)),
        (Some(Num::Int(i)), Some(n)) => {
            let Some(factor) = u32::try_from(-n).ok().and_then(|e| 10i64.checked_pow(e)) else {
                return Ok(Value::Int(0));
            };
            let rounded = round_half_even(i as f64 / factor as f64) as i64;
            rounded
                .checked_mul(factor)
                .map(Value::Int)
                .ok_or_else(|| Exception::new(ExcKind::OverflowError, "integer overflow"))
        }
        (Some(Num::Float(f)), None) => to_int(&Value::Float(round_half_even(f))),
        (Some(Num::Float(f)), Some(n)) => {
            if !f.is_finite() {
                return Ok(Value::Float(f));
            }
            let n = n.clamp(-308, 308) as i32;
            let factor = 10f64.powi(n.abs());
            let value = if n >= 0 {
                let scaled = f * factor;
                if scaled.is_infinite() {
                    f
                } else {
                    round_half_even(scaled) / factor
                }
            } else {
                round_half_even(f / factor) * factor
            };
            Ok(Value::Float(value))
        }
        (None, _) => Err(Exception::type_error(format!(
            "type {} doesn't define __round__ method",
            number.type_name()
        ))),
    }
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 && r % 2.0 != 0.0 {
        r - x.signum()
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ExcKind;
    use crate::host::NoHost;
    use crate::interp::{Interpreter, Limits};
    use crate::parser::parse;
    use crate::value::Value;

    fn eval(src: &str) -> Value {
        let program = parse(&format!("result = {src}")).unwrap();
        let mut host = NoHost;
        let mut interp = Interpreter::new(&mut host, Limits::default());
        interp.run(&program).unwrap();
        interp.global("result").unwrap()
    }

    fn fails(src: &str) -> ExcKind {
        let program = parse(src).unwrap();
        let mut host = NoHost;
        let mut interp = Interpreter::new(&mut host, Limits::default());
        interp.run(&program).unwrap_err().kind
    }

    #[test]
    fn aggregates() {
        assert_eq!(eval("len('héllo')").repr(), "5");
        assert_eq!(eval("sum([1, 2, 3])").repr(), "6");
        assert_eq!(eval("sum([0.5, 0.25], 1)").repr(), "1.75");
        assert_eq!(eval("min(3, 1, 2)").repr(), "1");
        assert_eq!(eval("max(['a', 'ccc', 'bb'], key=len)").repr(), "'ccc'");
        assert_eq!(eval("max([], default=None)").repr(), "None");
        assert_eq!(eval("abs(-2.5)").repr(), "2.5");
        assert_eq!(eval("any([0, '', 3])").repr(), "True");
        assert_eq!(eval("all([])").repr(), "True");
        assert_eq!(fails("min([])"), ExcKind::ValueError);
        assert_eq!(fails("sum(['a'], '')"), ExcKind::TypeError);
    }

    #[test]
    fn sorting_is_stable() {
        assert_eq!(
            eval("sorted([('b', 1), ('a', 2), ('c', 1)], key=lambda p: p[1])").repr(),
            "[('b', 1), ('c', 1), ('a', 2)]"
        );
        assert_eq!(
            eval("sorted([3, 1, 2], reverse=True)").repr(),
            "[3, 2, 1]"
        );
        assert_eq!(fails("sorted([1, 'a'])"), ExcKind::TypeError);
    }

    #[test]
    fn iteration_helpers() {
        assert_eq!(
            eval("list(enumerate(['a', 'b'], 1))").repr(),
            "[(1, 'a'), (2, 'b')]"
        );
        assert_eq!(eval("list(zip([1, 2, 3], 'ab'))").repr(), "[(1, 'a'), (2, 'b')]");
        assert_eq!(eval("list(map(lambda x: x * 2, range(3)))").repr(), "[0, 2, 4]");
        assert_eq!(eval("list(filter(None, [0, 1, '', 'x']))").repr(), "[1, 'x']");
        assert_eq!(eval("list(reversed([1, 2, 3]))").repr(), "[3, 2, 1]");
    }

    #[test]
    fn rounding_ties_to_even() {
        assert_eq!(eval("round(2.5)").repr(), "2");
        assert_eq!(eval("round(3.5)").repr(), "4");
        assert_eq!(eval("round(-0.5)").repr(), "0");
        assert_eq!(eval("round(3.14159, 2)").repr(), "3.14");
        assert_eq!(eval("round(1234, -2)").repr(), "1200");
    }

    #[test]
    fn conversions() {
        assert_eq!(eval("int(' 42 ')").repr(), "42");
        assert_eq!(eval("int('-7')").repr(), "-7");
        assert_eq!(eval("int('ff', 16)").repr(), "255");
        assert_eq!(eval("int(3.9)").repr(), "3");
        assert_eq!(eval("float('1.5')").repr(), "1.5");
        assert_eq!(eval("float('-inf')").repr(), "-inf");
        assert_eq!(eval("str(1.0)").repr(), "'1.0'");
        assert_eq!(eval("bool([])").repr(), "False");
        assert_eq!(eval("dict([('a', 1)], b=2)").repr(), "{'a': 1, 'b': 2}");
        assert_eq!(eval("tuple('ab')").repr(), "('a', 'b')");
        assert_eq!(eval("list(range(5, 0, -2))").repr(), "[5, 3, 1]");
        assert_eq!(eval("type(1) == int").repr(), "True");
        assert_eq!(eval("type('x').__name__").repr(), "'str'");
        assert_eq!(fails("int('abc')"), ExcKind::ValueError);
        assert_eq!(fails("float('x1')"), ExcKind::ValueError);
        assert_eq!(fails("range(1, 2, 0)"), ExcKind::ValueError);
    }

    #[test]
    fn print_options() {
        let program = parse("print(1, 2, sep='-', end='!')\nprint()").unwrap();
        let mut host = NoHost;
        let mut interp = Interpreter::new(&mut host, Limits::default());
        interp.run(&program).unwrap();
        assert_eq!(interp.stdout(), "1-2!\n");
    }
}
