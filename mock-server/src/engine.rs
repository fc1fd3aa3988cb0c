//! Template handling for the sandbox, built on `handlebars`.
//!
//! Sources are compiled for syntax checking, rendered against a JSON model
//! (HTML-escaped for `HtmlBody`, verbatim otherwise), and walked to infer a
//! suggested model from the placeholders they reference.

use handlebars::template::{HelperTemplate, Parameter, Template, TemplateElement};
use handlebars::{no_escape, Handlebars, RenderError};
use serde_json::{Map, Value};

/// Number of sample elements placed in an inferred array.
pub const INFERRED_ARRAY_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Compile `source`, reporting the first syntax error with its position.
pub fn compile(source: &str) -> Result<Template, SyntaxError> {
    Template::compile(source).map_err(|e| {
        let (line, column) = e.pos().unwrap_or((1, 1));
        SyntaxError {
            message: e.reason().to_string(),
            line: line as u32,
            column: column as u32,
        }
    })
}

pub fn render(source: &str, model: &Value, escape_html: bool) -> Result<String, RenderError> {
    let mut registry = Handlebars::new();
    if !escape_html {
        registry.register_escape_fn(no_escape);
    }
    registry.render_template(source, model)
}

// ---------------------------------------------------------------------------
// Model inference
// ---------------------------------------------------------------------------

/// Build a sample model covering every placeholder `template` references.
pub fn suggest_model(template: &Template) -> Map<String, Value> {
    let mut model = Map::new();
    infer_into(&mut model, template);
    model
}

fn infer_into(model: &mut Map<String, Value>, template: &Template) {
    for element in &template.elements {
        match element {
            TemplateElement::Expression(ht) | TemplateElement::HtmlExpression(ht) => {
                if ht.params.is_empty() {
                    insert_placeholder(model, &ht.name);
                } else {
                    ht.params.iter().for_each(|p| insert_placeholder(model, p));
                }
            }
            TemplateElement::HelperBlock(ht) => infer_block(model, ht),
            _ => {}
        }
    }
}

fn infer_block(model: &mut Map<String, Value>, ht: &HelperTemplate) {
    let helper = ht.name.as_name().unwrap_or_default();
    let inner = || ht.template.as_ref().map(suggest_model).unwrap_or_default();

    match (helper, ht.params.first().and_then(placeholder_path)) {
        ("each", Some(path)) => {
            let item = inner();
            let sample = if item.is_empty() {
                placeholder(&path)
            } else {
                Value::Object(item)
            };
            insert_at(model, &path, Value::Array(vec![sample; INFERRED_ARRAY_LEN]));
        }
        ("with", Some(path)) => insert_at(model, &path, Value::Object(inner())),
        (_, Some(_)) => {
            ht.params.iter().for_each(|p| insert_placeholder(model, p));
            if let Some(body) = &ht.template {
                infer_into(model, body);
            }
        }
        // A section over a model value: `{{#order}}` or `{{^order}}`.
        (_, None) => {
            if let Some(path) = placeholder_path(&ht.name) {
                let fields = inner();
                if !fields.is_empty() {
                    insert_at(model, &path, Value::Object(fields));
                }
            }
        }
    }
    if let Some(inverse) = &ht.inverse {
        infer_into(model, inverse);
    }
}

/// Model path a parameter refers to, or `None` for literals, the current
/// context, block locals and parent lookups.
fn placeholder_path(param: &Parameter) -> Option<Vec<String>> {
    let raw = param.as_name()?;
    let raw = raw
        .strip_prefix("this.")
        .or_else(|| raw.strip_prefix("./"))
        .unwrap_or(raw);
    if matches!(raw, "" | "this" | "." | "else") || raw.starts_with('@') || raw.starts_with("..") {
        return None;
    }
    let path: Vec<String> = raw
        .split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!path.is_empty()).then_some(path)
}

fn placeholder(path: &[String]) -> Value {
    let last = path.last().map(String::as_str).unwrap_or_default();
    Value::String(format!("{last}_Value"))
}

fn insert_placeholder(model: &mut Map<String, Value>, param: &Parameter) {
    if let Some(path) = placeholder_path(param) {
        insert_at(model, &path, placeholder(&path));
    }
}

/// Place `value` at `path`, creating intermediate objects. Objects merge,
/// and a scalar placeholder gives way to an inferred array or object.
fn insert_at(model: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        match (model.get_mut(first), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            (Some(existing), value @ (Value::Array(_) | Value::Object(_))) => {
                if existing.is_string() {
                    *existing = value;
                }
            }
            (Some(_), _) => {}
            (None, value) => {
                model.insert(first.clone(), value);
            }
        }
        return;
    }
    let entry = model
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        insert_at(child, rest, value);
    }
}

/// Deep-merge `incoming` into `target`, keeping existing objects.
pub fn merge(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match target.get_mut(&key) {
            Some(Value::Object(existing)) => {
                if let Value::Object(child) = value {
                    merge(existing, child);
                }
            }
            Some(existing) => {
                if existing.is_string() && (value.is_array() || value.is_object()) {
                    *existing = value;
                }
            }
            None => {
                target.insert(key, value);
            }
        }
    }
}
