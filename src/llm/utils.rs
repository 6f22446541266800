use serde_json::{Map, Value};

/// Strips prose or markdown fences around the outermost JSON object or array.
pub fn clean_json_output(raw: &str) -> String {
    if let Some(start) = raw.find('{') {
        if let Some(end) = raw.rfind('}') {
            if end > start {
                return raw[start..=end].to_string();
            }
        }
    }
    if let Some(start) = raw.find('[') {
        if let Some(end) = raw.rfind(']') {
            if end > start {
                return raw[start..=end].to_string();
            }
        }
    }
    raw.trim().to_string()
}

/// Reads a number that may arrive as a JSON number or a numeric string
/// ("1,200.50", "$800"). Anything else is 0.
pub fn number_or_zero(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).unwrap_or(0.0)
}

pub fn integer_or_zero(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

pub fn string_or_empty(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Produces a self-contained schema: `$ref`s into `definitions` are inlined
/// and the `$schema`/`definitions` keys are dropped, which is the subset
/// structured-output endpoints accept.
pub fn inline_schema(root: schemars::schema::RootSchema) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(root)?;
    let definitions = value
        .as_object_mut()
        .and_then(|obj| obj.remove("definitions"))
        .and_then(|defs| match defs {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    Ok(resolve_refs(value, &definitions, 0))
}

fn resolve_refs(value: Value, definitions: &Map<String, Value>, depth: usize) -> Value {
    if depth > 16 {
        return value;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                let name = reference.trim_start_matches("#/definitions/");
                if let Some(def) = definitions.get(name) {
                    return resolve_refs(def.clone(), definitions, depth + 1);
                }
            }
            // allOf with a single $ref is how schemars wraps described refs
            if let Some(Value::Array(all_of)) = map.get("allOf") {
                if all_of.len() == 1 {
                    let mut inner = resolve_refs(all_of[0].clone(), definitions, depth + 1);
                    if let (Some(inner_obj), Some(desc)) =
                        (inner.as_object_mut(), map.get("description"))
                    {
                        inner_obj.insert("description".to_string(), desc.clone());
                    }
                    return inner;
                }
            }
            Value::Object(
                map.into_iter()
                    .filter(|(k, _)| k != "title")
                    .map(|(k, v)| (k, resolve_refs(v, definitions, depth)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_refs(v, definitions, depth))
                .collect(),
        ),
        other => other,
    }
}
