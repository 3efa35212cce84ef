use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CrateError;

#[derive(Debug, Clone, Default)]
pub struct Context {
    values: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = (String, String)>) {
        self.values.extend(values);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn substitute(&self, input: &str) -> Result<String, CrateError> {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.char_indices().peekable();
        while let Some((start, ch)) = chars.next() {
            match ch {
                '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let rest = &input[start + 1..];
                    let end = rest
                        .find('}')
                        .ok_or_else(|| CrateError::MalformedPlaceholder(input.to_string()))?;
                    let token = &rest[..end];
                    if !is_token(token) {
                        return Err(CrateError::MalformedPlaceholder(input.to_string()));
                    }
                    let value =
                        self.get(token)
                            .ok_or_else(|| CrateError::UnresolvedPlaceholder {
                                token: token.to_string(),
                                value: input.to_string(),
                            })?;
                    out.push_str(value);
                    for _ in 0..=end {
                        chars.next();
                    }
                }
                '}' => return Err(CrateError::MalformedPlaceholder(input.to_string())),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    pub fn substitute_tree(&self, value: &mut Value) -> Result<(), CrateError> {
        match value {
            Value::String(text) => {
                if text.contains(['{', '}']) {
                    *text = self.substitute(text)?;
                }
                Ok(())
            }
            Value::Array(items) => items
                .iter_mut()
                .try_for_each(|item| self.substitute_tree(item)),
            Value::Object(map) => map
                .values_mut()
                .try_for_each(|item| self.substitute_tree(item)),
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
        }
    }
}

fn is_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn context() -> Context {
        let mut ctx = Context::new();
        ctx.insert("prefix", "DBH");
        ctx.insert("metagoflow_version", "v5.1");
        ctx
    }

    #[test]
    fn substitutes_tokens() {
        let out = context()
            .substitute("functional-annotation/{prefix}.merged.summary.go")
            .unwrap();
        assert_eq!(out, "functional-annotation/DBH.merged.summary.go");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let out = context().substitute("{{not a token}} {prefix}").unwrap();
        assert_eq!(out, "{not a token} DBH");
    }

    #[test]
    fn unresolved_token_is_an_error() {
        let err = context().substitute("{ref_code}.json").unwrap_err();
        assert_matches!(err, CrateError::UnresolvedPlaceholder { token, .. } if token == "ref_code");
    }

    #[test]
    fn unbalanced_brace_is_malformed() {
        let err = context().substitute("{prefix").unwrap_err();
        assert_matches!(err, CrateError::MalformedPlaceholder(_));
        let err = context().substitute("prefix}").unwrap_err();
        assert_matches!(err, CrateError::MalformedPlaceholder(_));
    }

    #[test]
    fn tree_substitution_reaches_nested_values() {
        let mut node = json!({
            "@id": "https://github.com/emo-bon/MetaGOflow/releases/tag/{metagoflow_version}",
            "hasPart": [{"@id": "{prefix}.merged.summary.ko"}],
            "size": 3
        });
        context().substitute_tree(&mut node).unwrap();
        assert_eq!(
            node["@id"],
            "https://github.com/emo-bon/MetaGOflow/releases/tag/v5.1"
        );
        assert_eq!(node["hasPart"][0]["@id"], "DBH.merged.summary.ko");
    }
}
