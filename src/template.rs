//! Strict template rendering for step arguments.
//!
//! Templates see `params.<name>`, `steps.<step>.<output>` and `run.id`.
//! Rendering is strict: a reference to a missing value is an error, never an
//! empty string.

use crate::error::Result;
use crate::state::ReleaseRun;
use handlebars::Handlebars;
use serde_json::{Value, json};

/// Renders templates against a run's parameters and captured outputs
pub struct TemplateContext {
    registry: Handlebars<'static>,
    data: Value,
}

impl std::fmt::Debug for TemplateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateContext")
            .field("data", &self.data)
            .finish()
    }
}

impl TemplateContext {
    /// Build a context from the current state of a run
    pub fn for_run(run: &ReleaseRun) -> Self {
        Self::from_value(json!({
            "params": run.params,
            "steps": run.outputs_by_step(),
            "run": { "id": run.run_id, "plan": run.plan_name },
        }))
    }

    /// Build a context from raw data
    pub fn from_value(data: Value) -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry, data }
    }

    /// Render one template string
    pub fn render(&self, template: &str) -> Result<String> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        Ok(self.registry.render_template(template, &self.data)?)
    }

    /// Render every element of a list
    pub fn render_all(&self, templates: &[String]) -> Result<Vec<String>> {
        templates.iter().map(|t| self.render(t)).collect()
    }

    /// Render an optional template
    pub fn render_opt(&self, template: Option<&String>) -> Result<Option<String>> {
        template.map(|t| self.render(t)).transpose()
    }

    /// Render every string leaf of a JSON document
    pub fn render_json(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.render(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_json(v))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    rendered.insert(key.clone(), self.render_json(v)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TemplateContext {
        TemplateContext::from_value(json!({
            "params": { "version": "2.5.0" },
            "steps": { "create_pr": { "pr_number": 42, "pr_url": "https://example.com/pull/42" } },
            "run": { "id": "apollo-2.5.0" },
        }))
    }

    #[test]
    fn test_renders_params_and_outputs() {
        let ctx = context();
        assert_eq!(ctx.render("release/{{params.version}}").unwrap(), "release/2.5.0");
        assert_eq!(ctx.render("{{steps.create_pr.pr_number}}").unwrap(), "42");
        assert_eq!(ctx.render("plain").unwrap(), "plain");
    }

    #[test]
    fn test_does_not_html_escape() {
        let ctx = context();
        assert_eq!(
            ctx.render("<{{steps.create_pr.pr_url}}>").unwrap(),
            "<https://example.com/pull/42>"
        );
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let ctx = context();
        assert!(ctx.render("{{params.next_version}}").is_err());
        assert!(ctx.render("{{steps.missing.url}}").is_err());
    }

    #[test]
    fn test_render_json_leaves() {
        let ctx = context();
        let body = json!({ "text": "Released {{params.version}}", "n": 1, "tags": ["v{{params.version}}"] });
        let rendered = ctx.render_json(&body).unwrap();
        assert_eq!(rendered["text"], "Released 2.5.0");
        assert_eq!(rendered["tags"][0], "v2.5.0");
        assert_eq!(rendered["n"], 1);
    }
}
