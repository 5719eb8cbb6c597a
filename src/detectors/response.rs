use serde_json::{Map, Value};

/// Finds the first balanced `{...}` span in free-form model output that
/// parses as a JSON object with `key` at its top level. Prose and code
/// fences around the object are ignored.
pub fn find_json_object(text: &str, key: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start] != b'{' {
            continue;
        }
        let Some(end) = matching_brace(bytes, start) else {
            continue;
        };
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[start..=end]) {
            if map.contains_key(key) {
                return Some(map);
            }
        }
    }
    None
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Reads a four-element coordinate array.
///
/// Strict mode requires every element to be a JSON number. Lenient mode
/// coerces numeric strings and maps anything unreadable to `0`.
pub fn parse_box_values(value: &Value, lenient: bool) -> Option<[f64; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut out = [0.0f64; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = match item {
            Value::Number(number) => number.as_f64()?,
            Value::String(text) if lenient => text.trim().parse::<f64>().unwrap_or(0.0),
            _ if lenient => 0.0,
            _ => return None,
        };
    }
    Some(out)
}
