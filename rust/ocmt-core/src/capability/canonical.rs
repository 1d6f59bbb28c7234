use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

/// Serialize a value to the canonical JSON form that issuers sign: compact
/// separators, object keys in ascending byte order at every depth. Signature
/// verification across the mesh depends on this being byte-stable, so the
/// sort is applied explicitly rather than trusting map ordering.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut bytes = Vec::new();
    write_canonical(&value, &mut bytes)?;
    Ok(bytes)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));

            out.push(b'{');
            for (index, (key, entry)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(entry, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        other => serde_json::to_writer(&mut *out, other)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn it_sorts_keys_at_every_depth() {
        let value = json!({
            "zeta": {"b": 2, "a": 1},
            "alpha": [{"y": true, "x": false}],
        });
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":[{"x":false,"y":true}],"zeta":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn it_emits_no_insignificant_whitespace() {
        let bytes = canonical_json(&json!({"a": [1, 2], "b": "c d"})).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":[1,2],"b":"c d"}"#);
    }
}
