use serde_json::Value;

/// Find the first balanced JSON object in `text` that parses.
///
/// Models wrap structured answers in prose or code fences; this scans for
/// `{`, tracks string/escape state, and tries each balanced candidate.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;

    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(value @ Value::Object(_)) =
                            serde_json::from_str::<Value>(&text[open..=i])
                        {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }

        start = open + 1;
    }

    None
}
