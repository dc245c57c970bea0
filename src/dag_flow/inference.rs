//! Dependency inference for nodes that declare no dependencies.
//!
//! Inference is a heuristic over the node's input text. It never overrides a
//! declared list and its edges go through the same validation as declared ones.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use crate::core::config::InferencePolicy;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{-?(.*?)-?\}\}|\{%-?(.*?)-?%\}").unwrap();
    static ref OUTPUTS_INDEX: Regex =
        Regex::new(r#"outputs\s*\[\s*["']([^"']+)["']\s*\]"#).unwrap();
    static ref STRING_LITERAL: Regex = Regex::new(r#""[^"]*"|'[^']*'"#).unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
}

/// Derive the dependencies of `node_id` from its input.
///
/// `candidates` are the ids of every node in the graph, in insertion order;
/// the result keeps that order and never contains `node_id` itself.
pub fn infer_dependencies(
    node_id: &str,
    input: &Value,
    candidates: &[String],
    policy: InferencePolicy,
) -> Vec<String> {
    if policy == InferencePolicy::Disabled {
        return Vec::new();
    }

    let mut texts = Vec::new();
    collect_strings(input, &mut texts);

    let mut referenced: HashSet<String> = HashSet::new();
    for text in &texts {
        referenced.extend(placeholder_references(text));
    }

    candidates
        .iter()
        .filter(|candidate| candidate.as_str() != node_id)
        .filter(|candidate| {
            referenced.contains(candidate.as_str())
                || (policy == InferencePolicy::Mentions
                    && texts.iter().any(|text| mentions(text, candidate)))
        })
        .cloned()
        .collect()
}

/// Names referenced by `{{ }}` placeholders and `{% %}` blocks in `text`
pub fn placeholder_references(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(expr) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            continue;
        };
        for index in OUTPUTS_INDEX.captures_iter(expr) {
            refs.push(index[1].to_string());
        }

        // Identifiers after '.' are attributes and after '|' are filters
        let stripped = STRING_LITERAL.replace_all(expr, " ");
        for ident in IDENTIFIER.find_iter(&stripped) {
            let preceding = stripped[..ident.start()].trim_end().chars().last();
            if matches!(preceding, Some('.') | Some('|')) {
                continue;
            }
            // Tail of a numeric literal such as `1e3`
            if stripped[..ident.start()].ends_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            refs.push(ident.as_str().to_string());
        }
    }
    refs
}

/// `name` appears in `text` with no word character directly on either side.
/// Unlike `\b` this also holds for names such as `C++` that end in punctuation.
fn mentions(text: &str, name: &str) -> bool {
    match Regex::new(&format!(r"(?:^|\W){}(?:\W|$)", regex::escape(name))) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_placeholder_forms() {
        assert_eq!(placeholder_references("{{ fetch }}"), vec!["fetch"]);
        assert_eq!(placeholder_references("{{ fetch.rows }}"), vec!["fetch"]);
        assert_eq!(placeholder_references("{{ fetch | upper }}"), vec!["fetch"]);
        assert_eq!(
            placeholder_references(r#"{{ outputs["Query Database"] }}"#),
            vec!["Query Database", "outputs"]
        );
        assert!(placeholder_references("no templates here").is_empty());
    }

    #[test]
    fn test_infers_from_nested_input_in_insertion_order() {
        let input = json!({
            "summary": "{{ transform }}",
            "extra": ["see {{ fetch.rows }}"]
        });
        let deps = infer_dependencies(
            "report",
            &input,
            &ids(&["fetch", "transform", "report"]),
            InferencePolicy::Placeholders,
        );
        assert_eq!(deps, ids(&["fetch", "transform"]));
    }

    #[test]
    fn test_ignores_self_and_unknown_names() {
        let deps = infer_dependencies(
            "a",
            &json!("{{ a }} and {{ ghost }}"),
            &ids(&["a", "b"]),
            InferencePolicy::Placeholders,
        );
        assert!(deps.is_empty());
    }

    #[test]
    fn test_mentions_policy_matches_whole_words() {
        let input = json!("Summarize the fetch results, not fetcher");
        let candidates = ids(&["fetch", "fetcher2", "report"]);

        let placeholders_only =
            infer_dependencies("report", &input, &candidates, InferencePolicy::Placeholders);
        assert!(placeholders_only.is_empty());

        let mentioned = infer_dependencies("report", &input, &candidates, InferencePolicy::Mentions);
        assert_eq!(mentioned, ids(&["fetch"]));
    }

    #[test]
    fn test_mentions_names_with_punctuation() {
        let candidates = ids(&["C++", "Cobol", "report"]);
        let deps = infer_dependencies(
            "report",
            &json!("Compile with C++, then report"),
            &candidates,
            InferencePolicy::Mentions,
        );
        assert_eq!(deps, ids(&["C++"]));

        assert!(mentions("C++", "C++"));
        assert!(!mentions("xC++", "C++"));
    }

    #[test]
    fn test_block_statements_are_scanned() {
        assert_eq!(
            placeholder_references("{% for r in fetch.rows %}{{ r }}{% endfor %}"),
            vec!["for", "r", "in", "fetch", "r", "endfor"]
        );
        assert!(placeholder_references(r#"{{"total": 1}}"#).is_empty());
    }

    #[test]
    fn test_disabled_policy() {
        let deps = infer_dependencies(
            "b",
            &json!("{{ a }}"),
            &ids(&["a", "b"]),
            InferencePolicy::Disabled,
        );
        assert!(deps.is_empty());
    }
}
