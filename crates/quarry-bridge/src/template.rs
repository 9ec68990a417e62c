//! Rendering of tool descriptors into invocation templates
//!
//! Each discovered tool becomes a prompt fragment describing its
//! parameters and showing a concrete invocation the model can copy. The
//! example arguments are derived from the schema, so a rendered template
//! round-trips through the call parser.

use serde_json::{Map, Value};

/// Render one tool into its invocation template.
pub fn tool_to_template(name: &str, description: &str, schema: &Value) -> String {
    let mut out = String::new();

    out.push_str(&format!("## {name}\n"));
    if !description.is_empty() {
        out.push_str(&format!("Description: {description}\n"));
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let required = required_names(schema);

    match properties {
        Some(props) if !props.is_empty() => {
            out.push_str("\nParameters:\n");
            let mut names: Vec<&String> = props.keys().collect();
            names.sort();
            for prop_name in names {
                let prop = &props[prop_name];
                out.push_str(&render_parameter(prop_name, prop, &required));
            }
        }
        _ => out.push_str("\nParameters: none\n"),
    }

    let example = example_args(schema);
    out.push_str(&format!(
        "\nUsage:\n<{name}>\n<params>\n{}\n</params>\n</{name}>\n",
        serde_json::to_string_pretty(&example).unwrap_or_else(|_| "{}".to_string())
    ));

    // Single-required-parameter tools also accept a bare value
    if required.len() == 1 {
        if let Some(value) = example.get(&required[0]) {
            let bare = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!(
                "\nOr pass the single value directly:\n<{name}>\n<params>{bare}</params>\n</{name}>\n"
            ));
        }
    }

    out
}

fn render_parameter(name: &str, prop: &Value, required: &[String]) -> String {
    let type_name = prop
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("string");
    let requirement = if required.iter().any(|r| r == name) {
        "required"
    } else {
        "optional"
    };
    let description = prop
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut line = format!("- {name}: ({type_name}, {requirement})");
    if !description.is_empty() {
        line.push_str(&format!(" {description}"));
    }
    if let Some(choices) = prop.get("enum").and_then(Value::as_array) {
        let rendered: Vec<String> = choices
            .iter()
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        line.push_str(&format!(" (one of: {})", rendered.join(", ")));
    }
    line.push('\n');
    line
}

fn required_names(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Example argument object derived from the schema: required properties
/// when the schema names any, every property otherwise.
pub fn example_args(schema: &Value) -> Value {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(Map::new());
    };

    let required = required_names(schema);
    let mut example = Map::new();

    let mut names: Vec<&String> = props.keys().collect();
    names.sort();
    for name in names {
        if !required.is_empty() && !required.iter().any(|r| r == name) {
            continue;
        }
        example.insert(name.clone(), example_value(&props[name]));
    }

    Value::Object(example)
}

fn example_value(prop: &Value) -> Value {
    if let Some(choices) = prop.get("enum").and_then(Value::as_array) {
        if let Some(first) = choices.first() {
            return first.clone();
        }
    }
    if let Some(default) = prop.get("default") {
        return default.clone();
    }

    match prop.get("type").and_then(Value::as_str) {
        Some("number") | Some("integer") => Value::from(42),
        Some("boolean") => Value::from(true),
        Some("array") => Value::Array(Vec::new()),
        Some("object") => Value::Object(Map::new()),
        _ => Value::from("example"),
    }
}
