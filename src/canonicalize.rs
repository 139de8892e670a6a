//! Canonical JSON writer (RFC 8785 style)
//!
//! Object keys are sorted lexicographically, arrays keep their order, strings
//! use the minimal JCS escapes. The same logical value always produces the
//! same bytes, which is what lets a stored record be re-rendered and
//! compared byte for byte.

use serde_json::{Map, Number, Value};
use std::fmt::Write;

use crate::errors::SerializationError;

/// Canonicalize a JSON value into compact form
pub fn canonicalize_json(value: &Value) -> Result<String, SerializationError> {
    let mut output = String::new();
    write_value(value, &mut output, None, 0)?;
    Ok(output)
}

/// Canonicalize with two-space indentation. Key order is the same as compact.
pub fn canonicalize_json_pretty(value: &Value) -> Result<String, SerializationError> {
    let mut output = String::new();
    write_value(value, &mut output, Some("  "), 0)?;
    Ok(output)
}

fn newline(output: &mut String, indent: Option<&str>, level: usize) {
    if let Some(unit) = indent {
        output.push('\n');
        for _ in 0..level {
            output.push_str(unit);
        }
    }
}

fn write_value(
    value: &Value,
    output: &mut String,
    indent: Option<&str>,
    level: usize,
) -> Result<(), SerializationError> {
    match value {
        Value::Object(map) => write_object(map, output, indent, level)?,
        Value::Array(arr) => write_array(arr, output, indent, level)?,
        Value::String(s) => write_string(s, output)?,
        Value::Number(n) => write_number(n, output)?,
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Null => output.push_str("null"),
    }
    Ok(())
}

/// Serialize a JSON object with lexicographically sorted keys
fn write_object(
    map: &Map<String, Value>,
    output: &mut String,
    indent: Option<&str>,
    level: usize,
) -> Result<(), SerializationError> {
    output.push('{');
    if map.is_empty() {
        output.push('}');
        return Ok(());
    }

    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        newline(output, indent, level + 1);
        write_string(key, output)?;
        output.push(':');
        if indent.is_some() {
            output.push(' ');
        }
        write_value(&map[*key], output, indent, level + 1)?;
    }

    newline(output, indent, level);
    output.push('}');
    Ok(())
}

fn write_array(
    arr: &[Value],
    output: &mut String,
    indent: Option<&str>,
    level: usize,
) -> Result<(), SerializationError> {
    output.push('[');
    if arr.is_empty() {
        output.push(']');
        return Ok(());
    }

    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        newline(output, indent, level + 1);
        write_value(item, output, indent, level + 1)?;
    }

    newline(output, indent, level);
    output.push(']');
    Ok(())
}

/// Serialize a JSON string with JCS escaping
fn write_string(s: &str, output: &mut String) -> Result<(), SerializationError> {
    output.push('"');

    for ch in s.chars() {
        match ch {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{08}' => output.push_str("\\b"),
            '\u{0C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            ch if (ch as u32) < 0x20 => {
                write!(output, "\\u{:04x}", ch as u32)
                    .map_err(|e| SerializationError::canonical(e.to_string()))?;
            }
            ch => output.push(ch),
        }
    }

    output.push('"');
    Ok(())
}

/// Serialize a JSON number (ECMAScript-style shortest form)
fn write_number(num: &Number, output: &mut String) -> Result<(), SerializationError> {
    let fmt_err = |e: std::fmt::Error| SerializationError::canonical(e.to_string());

    if let Some(i) = num.as_i64() {
        write!(output, "{i}").map_err(fmt_err)?;
    } else if let Some(u) = num.as_u64() {
        write!(output, "{u}").map_err(fmt_err)?;
    } else if let Some(f) = num.as_f64() {
        if !f.is_finite() {
            return Err(SerializationError::canonical(format!(
                "non-finite number {f} is not allowed"
            )));
        }

        if f.fract() == 0.0 && f.abs() < 1e15 {
            write!(output, "{}", f as i64).map_err(fmt_err)?;
        } else {
            write!(output, "{f}").map_err(fmt_err)?;
        }
    } else {
        return Err(SerializationError::canonical("invalid number format"));
    }
    Ok(())
}
