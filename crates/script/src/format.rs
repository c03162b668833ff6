//! Format specifications for f-strings and `str.format`.

use crate::error::{Exception, Result};
use crate::value::{Value, python_exponent};

/// Widths past this are refused before any padding is allocated.
const MAX_WIDTH: usize = 1_000_000;
/// `format!` cannot take a precision above `u16::MAX`.
const MAX_PRECISION: usize = 1_000;

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|&c| is_align(c)) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i).filter(|c| matches!(c, '+' | '-' | ' ')) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        out.width = digits(&chars[start..i], spec)?;
        if out.width > MAX_WIDTH {
            return Err(Exception::value_error(format!(
                "format width {} exceeds the limit of {MAX_WIDTH}",
                out.width
            )));
        }
    }
    if let Some(&c) = chars.get(i).filter(|c| matches!(c, ',' | '_')) {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(Exception::value_error("format specifier missing precision"));
        }
        let precision = digits(&chars[start..i], spec)?;
        if precision > MAX_PRECISION {
            return Err(Exception::value_error(format!(
                "format precision {precision} exceeds the limit of {MAX_PRECISION}"
            )));
        }
        out.precision = Some(precision);
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(Exception::value_error(format!(
            "invalid format specifier '{spec}'"
        )));
    }
    Ok(out)
}

fn digits(chars: &[char], spec: &str) -> Result<usize> {
    chars
        .iter()
        .collect::<String>()
        .parse()
        .map_err(|_| Exception::value_error(format!("invalid format specifier '{spec}'")))
}

/// Apply a format specification to a value.
pub fn format_value(value: &Value, spec: &str) -> Result<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;

    match value {
        Value::Str(s) => {
            if !matches!(spec.kind, None | Some('s')) || spec.sign.is_some() {
                return Err(unknown_code(&spec, value));
            }
            let text: String = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            Ok(pad(&spec, "", &text, '<'))
        }
        Value::Int(_) | Value::Bool(_) => {
            let n = value.as_int().unwrap_or_default();
            match spec.kind {
                None | Some('d') | Some('n') => {
                    let body = group(&n.unsigned_abs().to_string(), spec.grouping);
                    Ok(pad(&spec, sign(&spec, n < 0), &body, '>'))
                }
                Some('x' | 'X' | 'o' | 'b') => Ok(radix(&spec, n)),
                Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => format_float(&spec, n as f64),
                _ => Err(unknown_code(&spec, value)),
            }
        }
        Value::Float(f) => match spec.kind {
            Some('d' | 'x' | 'X' | 'o' | 'b' | 's') => Err(unknown_code(&spec, value)),
            _ => format_float(&spec, *f),
        },
        other => Err(Exception::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn unknown_code(spec: &Spec, value: &Value) -> Exception {
    Exception::value_error(format!(
        "unknown format code '{}' for object of type '{}'",
        spec.kind.unwrap_or('s'),
        value.type_name()
    ))
}

fn format_float(spec: &Spec, f: f64) -> Result<String> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let abs = f.abs();

    let body = if !abs.is_finite() {
        let text = if abs.is_nan() { "nan" } else { "inf" };
        if matches!(spec.kind, Some('F' | 'E' | 'G')) {
            text.to_uppercase()
        } else {
            text.to_string()
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => fixed(abs, spec.precision.unwrap_or(6), spec.grouping),
            Some('e' | 'E') => {
                let text = python_exponent(&format!("{:.*e}", spec.precision.unwrap_or(6), abs));
                if spec.kind == Some('E') {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('%') => {
                let mut text = fixed(abs * 100.0, spec.precision.unwrap_or(6), spec.grouping);
                text.push('%');
                text
            }
            Some('g' | 'G') => general(abs, spec.precision.unwrap_or(6), spec.kind == Some('G')),
            None => match spec.precision {
                Some(p) => general(abs, p, false),
                None => crate::value::float_repr(abs),
            },
            _ => {
                return Err(Exception::value_error(format!(
                    "unknown format code '{}' for object of type 'float'",
                    spec.kind.unwrap_or('?')
                )));
            }
        }
    };
    Ok(pad(spec, sign(spec, negative), &body, '>'))
}

fn fixed(abs: f64, precision: usize, grouping: Option<char>) -> String {
    let text = format!("{abs:.precision$}");
    match text.split_once('.') {
        Some((int, frac)) => format!("{}.{frac}", group(int, grouping)),
        None => group(&text, grouping),
    }
}

fn general(abs: f64, precision: usize, upper: bool) -> String {
    let p = precision.max(1);
    if abs == 0.0 {
        return "0".into();
    }
    let exp = abs.log10().floor() as i64;
    let text = if exp < -4 || exp >= p as i64 {
        let text = format!("{:.*e}", p - 1, abs);
        let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let mantissa = strip_zeros(mantissa);
        python_exponent(&format!("{mantissa}e{exponent}"))
    } else {
        let decimals = (p as i64 - 1 - exp).max(0) as usize;
        strip_zeros(&format!("{abs:.decimals$}")).to_string()
    };
    if upper { text.to_uppercase() } else { text }
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn radix(spec: &Spec, n: i64) -> String {
    let abs = n.unsigned_abs();
    let (body, prefix) = match spec.kind {
        Some('x') => (format!("{abs:x}"), "0x"),
        Some('X') => (format!("{abs:X}"), "0X"),
        Some('o') => (format!("{abs:o}"), "0o"),
        _ => (format!("{abs:b}"), "0b"),
    };
    let body = if spec.alternate {
        format!("{prefix}{body}")
    } else {
        body
    };
    pad(spec, sign(spec, n < 0), &body, '>')
}

fn sign(spec: &Spec, negative: bool) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn group(digits: &str, separator: Option<char>) -> String {
    let Some(sep) = separator else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

fn pad(spec: &Spec, sign: &str, body: &str, default_align: char) -> String {
    let (fill, align) = match (spec.fill, spec.align, spec.zero) {
        (fill, Some(align), _) => (fill.unwrap_or(' '), align),
        (_, None, true) => ('0', '='),
        (_, None, false) => (' ', default_align),
    };
    let len = sign.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{body}");
    }
    let padding = spec.width - len;
    let fill_str = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{sign}{body}{}", fill_str(padding)),
        '^' => format!(
            "{}{sign}{body}{}",
            fill_str(padding / 2),
            fill_str(padding - padding / 2)
        ),
        '=' => format!("{sign}{}{body}", fill_str(padding)),
        _ => format!("{}{sign}{body}", fill_str(padding)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn floats() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(1234567.891), ",.1f"), "1,234,567.9");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Float(12345.0), ".2e"), "1.23e+04");
        assert_eq!(fmt(Value::Float(-2.5), "8.2f"), "   -2.50");
        assert_eq!(fmt(Value::Float(0.5), ".3g"), "0.5");
    }

    #[test]
    fn ints() {
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(-42), "05d"), "-0042");
        assert_eq!(fmt(Value::Int(1000000), ","), "1,000,000");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(7), ".2f"), "7.00");
        assert_eq!(fmt(Value::Int(5), "+d"), "+5");
    }

    #[test]
    fn strings() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::str("abcdef"), ".3"), "abc");
        assert_eq!(fmt(Value::str("ab"), "<4"), "ab  ");
    }

    #[test]
    fn bad_specs() {
        assert!(format_value(&Value::str("x"), "d").is_err());
        assert!(format_value(&Value::Float(1.0), "d").is_err());
        assert!(format_value(&Value::Int(1), "5.q").is_err());
        assert!(format_value(&Value::list(vec![]), ">3").is_err());
    }

    #[test]
    fn oversized_width_and_precision_are_refused() {
        let err = format_value(&Value::Int(1), ">1000000000").unwrap_err();
        assert_eq!(err.kind, crate::ExcKind::ValueError);
        let err = format_value(&Value::Float(1.5), ".70000f").unwrap_err();
        assert_eq!(err.kind, crate::ExcKind::ValueError);
        let err = format_value(&Value::Float(1.5), ".70000e").unwrap_err();
        assert_eq!(err.kind, crate::ExcKind::ValueError);
        assert_eq!(format_value(&Value::Int(7), "03").unwrap(), "007");
        assert_eq!(format_value(&Value::Int(1), ">1000").unwrap().len(), 1000);
    }
}
