//! Output capture from command stdout.

use crate::plan::{CaptureKind, CaptureRule};
use crate::state::CapturedOutputs;
use regex::Regex;
use std::sync::OnceLock;

static PR_NUMBER: OnceLock<Option<Regex>> = OnceLock::new();

/// First whitespace-separated token starting with `https://`
pub fn extract_url(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.starts_with("https://"))
        .map(|token| token.trim().to_string())
}

/// Number following `/pull/` in a URL
pub fn extract_pr_number(text: &str) -> Option<u64> {
    PR_NUMBER
        .get_or_init(|| Regex::new(r"/pull/(\d+)").ok())
        .as_ref()?
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Output key a rule stores its value under
pub(super) fn rule_key(rule: &CaptureRule) -> &str {
    match (&rule.key, rule.from) {
        (Some(key), _) => key,
        (None, CaptureKind::Url) => "url",
        (None, CaptureKind::PrNumber) => "pr_number",
        (None, CaptureKind::Stdout) => "stdout",
        (None, CaptureKind::Json) => "json",
    }
}

/// Apply capture rules to a command's stdout
pub fn apply_captures(rules: &[CaptureRule], stdout: &str) -> Result<CapturedOutputs, String> {
    let mut outputs = CapturedOutputs::new();
    for rule in rules {
        match rule.from {
            CaptureKind::Url => {
                let url = extract_url(stdout)
                    .ok_or_else(|| format!("no https:// URL in output:\n{}", stdout.trim()))?;
                outputs.insert(rule_key(rule).to_string(), serde_json::Value::String(url));
            }
            CaptureKind::PrNumber => {
                let number = extract_pr_number(stdout)
                    .ok_or_else(|| format!("no pull request URL in output:\n{}", stdout.trim()))?;
                outputs.insert(rule_key(rule).to_string(), serde_json::Value::from(number));
            }
            CaptureKind::Stdout => {
                outputs.insert(
                    rule_key(rule).to_string(),
                    serde_json::Value::String(stdout.trim().to_string()),
                );
            }
            CaptureKind::Json => {
                let value: serde_json::Value = serde_json::from_str(stdout.trim())
                    .map_err(|e| format!("stdout is not JSON: {}", e))?;
                let serde_json::Value::Object(map) = value else {
                    return Err("stdout JSON is not an object".to_string());
                };
                outputs.extend(map);
            }
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(from: CaptureKind, key: Option<&str>) -> CaptureRule {
        CaptureRule {
            from,
            key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_pr_capture() {
        let stdout = "Creating pull request for release/2.5.0 into master\n\nhttps://github.com/acme/widget/pull/5512\n";
        let outputs = apply_captures(
            &[
                rule(CaptureKind::Url, Some("pr_url")),
                rule(CaptureKind::PrNumber, None),
            ],
            stdout,
        )
        .unwrap();
        assert_eq!(outputs["pr_url"], json!("https://github.com/acme/widget/pull/5512"));
        assert_eq!(outputs["pr_number"], json!(5512));
    }

    #[test]
    fn test_json_capture_merges_fields() {
        let outputs =
            apply_captures(&[rule(CaptureKind::Json, None)], r#"{"sha": "abc", "size": 3}"#).unwrap();
        assert_eq!(outputs["sha"], json!("abc"));
        assert_eq!(outputs["size"], json!(3));
        assert!(apply_captures(&[rule(CaptureKind::Json, None)], "[1, 2]").is_err());
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let err = apply_captures(&[rule(CaptureKind::Url, None)], "nothing here").unwrap_err();
        assert!(err.contains("no https:// URL"));
    }
}
