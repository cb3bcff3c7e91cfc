//! `{{path}}` substitution in step parameter values.

use regex::Regex;
use serde_json::Value as Json;

use super::eval::resolve_path;

lazy_static::lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}")
        .unwrap_or_else(|_| unreachable!("placeholder pattern is a literal"));
}

pub fn contains_template(raw: &str) -> bool {
    PLACEHOLDER.is_match(raw)
}

/// Paths referenced by placeholders, in order of appearance.
pub fn placeholders(raw: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Substitutes placeholders from `scope`.
///
/// A value that is exactly one placeholder keeps the referenced JSON type
/// (`"{{input.Total}}"` can yield a number or an object). Otherwise each
/// placeholder is spliced in as text, with `null` rendering as empty.
pub fn render(raw: &str, scope: &Json) -> Json {
    let trimmed = raw.trim();
    if let Some(caps) = PLACEHOLDER.captures(trimmed)
        && let Some(whole) = caps.get(0)
        && whole.start() == 0
        && whole.end() == trimmed.len()
    {
        return lookup(scope, &caps[1]);
    }

    let rendered = PLACEHOLDER.replace_all(raw, |caps: &regex::Captures<'_>| {
        match lookup(scope, &caps[1]) {
            Json::Null => String::new(),
            Json::String(s) => s,
            other => other.to_string(),
        }
    });
    Json::String(rendered.into_owned())
}

fn lookup(scope: &Json, dotted: &str) -> Json {
    let path: Vec<String> = dotted.split('.').map(str::to_string).collect();
    resolve_path(scope, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_placeholder_keeps_type() {
        let scope = json!({"input": {"Total": 42.5, "Customer": {"Id": 7}}});
        assert_eq!(render("{{input.Total}}", &scope), json!(42.5));
        assert_eq!(render("{{ input.Customer }}", &scope), json!({"Id": 7}));
    }

    #[test]
    fn test_interpolation_inside_text() {
        let scope = json!({"order": {"OrderId": 12}, "name": "Ada"});
        assert_eq!(
            render("Order {{order.OrderId}} for {{name}}{{missing}}", &scope),
            json!("Order 12 for Ada")
        );
        assert_eq!(placeholders("{{a}} and {{b.c}}"), vec!["a", "b.c"]);
        assert!(!contains_template("no braces {here}"));
    }
}
