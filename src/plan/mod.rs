//! Release plans.
//!
//! A plan is the static TOML description of a release: the repository it
//! applies to, preflight requirements, declared parameters, checkpoints and
//! the ordered steps.

mod step;

pub use step::{
    CaptureKind, CaptureRule, Idempotency, StepAction, StepDefinition, WaitPolicy,
};

use crate::error::{PlanError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

fn default_identity_params() -> Vec<String> {
    vec!["version".to_string()]
}

/// A complete release plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleasePlan {
    /// Plan name, used as the run identifier prefix
    pub name: String,
    /// Parameters whose values identify a run
    #[serde(default = "default_identity_params")]
    pub identity_params: Vec<String>,
    /// Repository the plan applies to
    #[serde(default)]
    pub repository: RepositorySpec,
    /// Environment requirements checked before any step
    #[serde(default)]
    pub preflight: PreflightSpec,
    /// Declared parameters
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
    /// Operator guidance per checkpoint
    #[serde(default)]
    pub checkpoints: BTreeMap<String, CheckpointSpec>,
    /// Ordered steps
    pub steps: Vec<StepDefinition>,
}

/// Expected repository identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySpec {
    /// Normalized `host/owner/name` the remotes must point to
    #[serde(default)]
    pub expected: Option<String>,
    /// Remote that must match; any remote matches when unset
    #[serde(default)]
    pub remote: Option<String>,
    /// `owner/name` passed to `gh --repo`
    #[serde(default)]
    pub slug: Option<String>,
}

/// Preflight requirements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreflightSpec {
    /// Programs that must be on PATH
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Paths that must exist, relative to the repository root
    #[serde(default)]
    pub required_paths: Vec<String>,
    /// Glob patterns that must match nothing, relative to the repository root
    #[serde(default)]
    pub stale_artifacts: Vec<String>,
}

/// Parameter value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Any string
    #[default]
    String,
    /// Semantic version
    Semver,
}

/// A declared parameter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamSpec {
    /// What the parameter is for
    #[serde(default)]
    pub description: Option<String>,
    /// Must be supplied (or defaulted)
    #[serde(default)]
    pub required: bool,
    /// Value type
    #[serde(default)]
    pub kind: ParamKind,
    /// Regex the value must match
    #[serde(default)]
    pub pattern: Option<String>,
    /// Value used when none is supplied
    #[serde(default)]
    pub default: Option<String>,
}

/// Operator guidance for a checkpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointSpec {
    /// Shown when the run pauses at this checkpoint
    #[serde(default)]
    pub message: Option<String>,
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Replace anything outside `[A-Za-z0-9._-]` with `-`
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

impl ReleasePlan {
    /// Read and validate a plan file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PlanError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a plan document
    pub fn parse(content: &str) -> Result<Self> {
        let plan: ReleasePlan = toml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check structural consistency
    pub fn validate(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(invalid(format!(
                "plan name '{}' must be non-empty and use only letters, digits, '_' and '-'",
                self.name
            )));
        }
        if self.steps.is_empty() {
            return Err(invalid("plan declares no steps".to_string()));
        }
        if self.identity_params.is_empty() {
            return Err(invalid("identity_params must name at least one parameter".to_string()));
        }
        for name in &self.identity_params {
            if !self.params.contains_key(name) {
                return Err(invalid(format!(
                    "identity parameter '{}' is not declared under [params]",
                    name
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !is_valid_name(&step.name) {
                return Err(invalid(format!(
                    "step name '{}' must use only letters, digits, '_' and '-'",
                    step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(invalid(format!("duplicate step name '{}'", step.name)));
            }
            if let Some(checkpoint) = &step.checkpoint
                && !is_valid_name(checkpoint)
            {
                return Err(invalid(format!(
                    "step '{}' has invalid checkpoint name '{}'",
                    step.name, checkpoint
                )));
            }
            if let Some(wait) = &step.wait
                && (wait.interval_secs == Some(0) || wait.timeout_secs == Some(0))
            {
                return Err(invalid(format!(
                    "step '{}' wait_for_completion needs a non-zero interval_secs and timeout_secs",
                    step.name
                )));
            }
            if step.wait.is_some() && !step.action.produces_job() {
                return Err(invalid(format!(
                    "step '{}' waits for completion but a '{}' action has no remote job",
                    step.name,
                    step.action.kind()
                )));
            }
        }

        let declared = self.declared_checkpoints();
        for name in self.checkpoints.keys() {
            if !declared.contains(name) {
                log::warn!("Checkpoint '{}' has guidance but no step uses it", name);
            }
        }

        for (name, spec) in &self.params {
            if let Some(pattern) = &spec.pattern {
                Regex::new(pattern).map_err(|e| PlanError::InvalidParam {
                    name: name.clone(),
                    reason: format!("invalid pattern: {}", e),
                })?;
            }
        }

        Ok(())
    }

    /// Checkpoint names bound to at least one step
    pub fn declared_checkpoints(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .filter_map(|s| s.checkpoint.clone())
            .collect()
    }

    /// Guidance shown when pausing at `checkpoint` before `step`
    pub fn checkpoint_message(&self, checkpoint: &str, step: &StepDefinition) -> String {
        self.checkpoints
            .get(checkpoint)
            .and_then(|c| c.message.clone())
            .unwrap_or_else(|| format!("Confirm before running '{}'", step.label()))
    }

    /// Find a step definition by name
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Supplied parameters plus declared defaults
    pub fn with_defaults(&self, supplied: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut params = supplied.clone();
        for (name, spec) in &self.params {
            if let Some(default) = &spec.default {
                params.entry(name.clone()).or_insert_with(|| default.clone());
            }
        }
        params
    }

    /// Validate a complete parameter set against the declarations
    pub fn validate_params(&self, params: &BTreeMap<String, String>) -> Result<()> {
        for name in params.keys() {
            if !self.params.contains_key(name) {
                return Err(PlanError::InvalidParam {
                    name: name.clone(),
                    reason: "not declared by the plan".to_string(),
                }
                .into());
            }
        }

        for (name, spec) in &self.params {
            let required = spec.required || self.identity_params.contains(name);
            let Some(value) = params.get(name) else {
                if required {
                    return Err(PlanError::InvalidParam {
                        name: name.clone(),
                        reason: "required but not supplied (use --param NAME=VALUE)".to_string(),
                    }
                    .into());
                }
                continue;
            };

            if spec.kind == ParamKind::Semver {
                semver::Version::parse(value).map_err(|e| PlanError::InvalidParam {
                    name: name.clone(),
                    reason: format!("'{}' is not a semantic version: {}", value, e),
                })?;
            }

            if let Some(pattern) = &spec.pattern {
                let re = Regex::new(pattern).map_err(|e| PlanError::InvalidParam {
                    name: name.clone(),
                    reason: format!("invalid pattern: {}", e),
                })?;
                if !re.is_match(value) {
                    return Err(PlanError::InvalidParam {
                        name: name.clone(),
                        reason: format!("'{}' does not match /{}/", value, pattern),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Stable run identifier for a parameter set
    pub fn run_id(&self, params: &BTreeMap<String, String>) -> Result<String> {
        let mut parts = vec![self.name.clone()];
        for name in &self.identity_params {
            let value = params.get(name).ok_or_else(|| PlanError::InvalidParam {
                name: name.clone(),
                reason: "identifies the run and must be supplied".to_string(),
            })?;
            parts.push(value.clone());
        }
        Ok(sanitize_id(&parts.join("-")))
    }
}

fn invalid(reason: String) -> crate::error::ReleaseError {
    PlanError::Invalid { reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name = "apollo"

[repository]
expected = "github.com/apolloconfig/apollo"
slug = "apolloconfig/apollo"

[preflight]
required_tools = ["git", "gh"]
stale_artifacts = ["dist/*.zip"]

[params.version]
kind = "semver"

[params.next_version]
required = true
kind = "semver"

[params.docker_tag]
default = "latest"
pattern = "^[a-z0-9.-]+$"

[checkpoints.publish]
message = "Review the draft release notes, then confirm publishing"

[[steps]]
name = "push_branch"
idempotency = "safe-to-repeat"
[steps.action]
type = "push_branch"
branch = "release/{{params.version}}"

[[steps]]
name = "publish_release"
checkpoint = "publish"
[steps.action]
type = "create_release"
tag = "v{{params.version}}"
"#;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_plan() {
        let plan = ReleasePlan::parse(PLAN).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.identity_params, vec!["version".to_string()]);
        assert_eq!(
            plan.declared_checkpoints().into_iter().collect::<Vec<_>>(),
            vec!["publish".to_string()]
        );
        assert!(plan.checkpoint_message("publish", &plan.steps[1]).contains("draft release notes"));
    }

    #[test]
    fn test_run_id_is_sanitized() {
        let plan = ReleasePlan::parse(PLAN).unwrap();
        let id = plan.run_id(&params(&[("version", "2.5.0+build/7")])).unwrap();
        assert_eq!(id, "apollo-2.5.0-build-7");
    }

    #[test]
    fn test_param_validation() {
        let plan = ReleasePlan::parse(PLAN).unwrap();

        let ok = plan.with_defaults(&params(&[("version", "2.5.0"), ("next_version", "2.6.0")]));
        assert_eq!(ok.get("docker_tag").map(String::as_str), Some("latest"));
        plan.validate_params(&ok).unwrap();

        let missing = plan.with_defaults(&params(&[("version", "2.5.0")]));
        assert!(plan.validate_params(&missing).is_err());

        let bad_semver = params(&[("version", "two"), ("next_version", "2.6.0")]);
        assert!(plan.validate_params(&bad_semver).is_err());

        let bad_pattern = params(&[
            ("version", "2.5.0"),
            ("next_version", "2.6.0"),
            ("docker_tag", "Not Valid"),
        ]);
        assert!(plan.validate_params(&bad_pattern).is_err());

        let undeclared = params(&[("version", "2.5.0"), ("next_version", "2.6.0"), ("typo", "x")]);
        assert!(plan.validate_params(&undeclared).is_err());
    }

    #[test]
    fn test_duplicate_steps_rejected() {
        let doc = r#"
name = "demo"
[params.version]
[[steps]]
name = "a"
[steps.action]
type = "noop"
[[steps]]
name = "a"
[steps.action]
type = "noop"
"#;
        let err = ReleasePlan::parse(doc).unwrap_err();
        assert!(err.to_string().contains("duplicate step name 'a'"));
    }

    #[test]
    fn test_wait_requires_remote_job() {
        let doc = r#"
name = "demo"
[params.version]
[[steps]]
name = "a"
[steps.wait_for_completion]
timeout_secs = 10
[steps.action]
type = "command"
program = "true"
"#;
        assert!(ReleasePlan::parse(doc).is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let doc = |interval: u64, timeout: u64| {
            format!(
                r#"
name = "demo"
[params.version]
[[steps]]
name = "ci"
[steps.action]
type = "dispatch_workflow"
workflow = "release.yml"
ref = "main"
[steps.wait_for_completion]
interval_secs = {interval}
timeout_secs = {timeout}
"#
            )
        };

        let err = ReleasePlan::parse(&doc(0, 60)).unwrap_err();
        assert!(err.to_string().contains("non-zero interval_secs"));
        assert!(ReleasePlan::parse(&doc(10, 0)).is_err());
        assert!(ReleasePlan::parse(&doc(10, 60)).is_ok());
    }

    #[test]
    fn test_undeclared_identity_param_rejected() {
        let doc = r#"
name = "demo"
[[steps]]
name = "a"
[steps.action]
type = "noop"
"#;
        let err = ReleasePlan::parse(doc).unwrap_err();
        assert!(err.to_string().contains("identity parameter 'version'"));
    }
}
