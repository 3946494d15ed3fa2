//! Parameter references between steps.
//!
//! String values in step parameters may embed references:
//!
//! - `{{ steps.<step>.output }}` / `{{ steps.<step>.output.<path> }}`
//! - `{{ context }}` / `{{ context.<path> }}`
//!
//! Path segments index objects by key and arrays by position. A string
//! consisting of exactly one reference is replaced by the referenced JSON
//! value, keeping its type; references inside longer strings are
//! interpolated as text.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::adapters::Params;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A parsed reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Output of a prior step
    Step { step: String, path: Vec<String> },

    /// Initial run context
    Context { path: Vec<String> },
}

impl Reference {
    /// Parse the text between `{{` and `}}`
    pub fn parse(expr: &str) -> Result<Self, String> {
        let expr = expr.trim();
        let segments: Vec<&str> = expr.split('.').map(str::trim).collect();

        if segments.iter().any(|s| s.is_empty()) {
            return Err(format!("malformed reference '{}'", expr));
        }

        match segments.as_slice() {
            ["context", path @ ..] => Ok(Self::Context {
                path: path.iter().map(|s| s.to_string()).collect(),
            }),
            ["steps", step, "output", path @ ..] => Ok(Self::Step {
                step: step.to_string(),
                path: path.iter().map(|s| s.to_string()).collect(),
            }),
            _ => Err(format!(
                "malformed reference '{}': expected 'steps.<name>.output[...]' or 'context[...]'",
                expr
            )),
        }
    }

    fn lookup<'a>(&self, context: &'a Value, outputs: &'a HashMap<String, Value>) -> Option<&'a Value> {
        let (root, path) = match self {
            Self::Context { path } => (context, path),
            Self::Step { step, path } => (outputs.get(step)?, path),
        };
        path.iter().try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

/// A piece of a template string
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Ref(&'a str),
}

fn split_template(s: &str) -> Result<Vec<Piece<'_>>, String> {
    let mut pieces = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find(OPEN) {
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| format!("unterminated reference in '{}'", s))?;

        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        pieces.push(Piece::Ref(&after[..end]));
        rest = &after[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

/// Collect every reference appearing anywhere in a parameter map
pub fn collect_references(params: &Params) -> Result<Vec<Reference>, String> {
    let mut refs = Vec::new();
    for value in params.values() {
        collect_from_value(value, &mut refs)?;
    }
    Ok(refs)
}

fn collect_from_value(value: &Value, refs: &mut Vec<Reference>) -> Result<(), String> {
    match value {
        Value::String(s) => {
            for piece in split_template(s)? {
                if let Piece::Ref(expr) = piece {
                    refs.push(Reference::parse(expr)?);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_from_value(item, refs)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_from_value(item, refs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Substitute references using the run context and completed step outputs
pub fn resolve_params(
    params: &Params,
    context: &Map<String, Value>,
    outputs: &HashMap<String, Value>,
) -> Result<Params, String> {
    let context = Value::Object(context.clone());
    params
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, &context, outputs)?)))
        .collect()
}

fn resolve_value(value: &Value, context: &Value, outputs: &HashMap<String, Value>) -> Result<Value, String> {
    match value {
        Value::String(s) => resolve_string(s, context, outputs),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, context, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value(v, context, outputs)?)))
            .collect::<Result<Map<_, _>, String>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, context: &Value, outputs: &HashMap<String, Value>) -> Result<Value, String> {
    let pieces = split_template(s)?;

    let resolve = |expr: &str| -> Result<Value, String> {
        let reference = Reference::parse(expr)?;
        reference
            .lookup(context, outputs)
            .cloned()
            .ok_or_else(|| format!("reference '{}' did not resolve", expr.trim()))
    };

    // A lone reference keeps the referenced value's type
    if let [Piece::Ref(expr)] = pieces.as_slice() {
        return resolve(*expr);
    }

    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Ref(expr) => match resolve(expr)? {
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            },
        }
    }
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(
            Reference::parse(" steps.create_account.output.id ").unwrap(),
            Reference::Step {
                step: "create_account".to_string(),
                path: vec!["id".to_string()],
            }
        );
        assert_eq!(
            Reference::parse("context").unwrap(),
            Reference::Context { path: vec![] }
        );
        assert!(Reference::parse("steps.create_account").is_err());
        assert!(Reference::parse("outputs.x").is_err());
        assert!(Reference::parse("context..x").is_err());
    }

    #[test]
    fn test_lone_reference_keeps_type() {
        let params = as_params(json!({
            "account_id": "{{ steps.create_account.output.id }}",
            "seats": "{{context.seats}}",
        }));
        let context = as_params(json!({"seats": 5}));
        let outputs = HashMap::from([("create_account".to_string(), json!({"id": 42}))]);

        let resolved = resolve_params(&params, &context, &outputs).unwrap();
        assert_eq!(resolved["account_id"], json!(42));
        assert_eq!(resolved["seats"], json!(5));
    }

    #[test]
    fn test_interpolation_in_nested_values() {
        let params = as_params(json!({
            "text": "Welcome {{ context.customer.name }}! Account #{{ steps.create_account.output.id }}",
            "blocks": [{"text": "{{ steps.create_account.output.tags.1 }}"}],
        }));
        let context = as_params(json!({"customer": {"name": "Acme"}}));
        let outputs = HashMap::from([(
            "create_account".to_string(),
            json!({"id": 42, "tags": ["new", "enterprise"]}),
        )]);

        let resolved = resolve_params(&params, &context, &outputs).unwrap();
        assert_eq!(resolved["text"], json!("Welcome Acme! Account #42"));
        assert_eq!(resolved["blocks"][0]["text"], json!("enterprise"));
    }

    #[test]
    fn test_unresolved_reference() {
        let params = as_params(json!({"id": "{{ steps.missing.output }}"}));
        let result = resolve_params(&params, &Map::new(), &HashMap::new());
        assert!(result.unwrap_err().contains("did not resolve"));
    }

    #[test]
    fn test_collect_references() {
        let params = as_params(json!({
            "a": "{{ steps.one.output }}",
            "b": {"c": ["x {{ context.user }} {{ steps.two.output.id }}"]},
            "d": 7,
        }));
        let refs = collect_references(&params).unwrap();
        assert_eq!(refs.len(), 3);

        let unterminated = as_params(json!({"a": "{{ steps.one.output"}));
        assert!(collect_references(&unterminated).is_err());
    }

    #[test]
    fn test_plain_strings_untouched() {
        let params = as_params(json!({"text": "no references here", "n": null}));
        let resolved = resolve_params(&params, &Map::new(), &HashMap::new()).unwrap();
        assert_eq!(Value::Object(resolved), json!({"text": "no references here", "n": null}));
    }
}
