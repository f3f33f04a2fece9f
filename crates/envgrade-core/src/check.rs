//! Check specification model and rubric loading.
//!
//! A rubric document is loosely structured JSON. Envelope fields (`id`,
//! `type`, `score`, `timeout`, `requires`) are read with defaults and
//! coerced when their JSON type is off, and the per-type `params` map is
//! decoded once, at load time, into a [`CheckKind`]. Only malformed JSON
//! fails the load: bad params decode into [`CheckKind::Invalid`] and surface
//! later as a failing result.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{GradeError, Result};

/// Points awarded by a check that does not declare a score.
pub const DEFAULT_SCORE: u64 = 1;

/// Timeout applied to command-running checks that do not declare one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// What a check inspects, with its parameters already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    /// `command -v <name>` succeeds with non-empty output.
    CommandExists { name: String },

    /// Command succeeds and its combined output contains one of the literals.
    OutputContains {
        command: String,
        contains: Vec<String>,
    },

    /// Every path is a regular file.
    FilesExist { paths: Vec<String> },

    /// Every path is a directory.
    DirsExist { paths: Vec<String> },

    /// Named environment variable is set and non-empty.
    EnvvarSet { name: String },

    /// File exists, is readable and contains one of the literals.
    FileContains { path: String, contains: Vec<String> },

    /// Command exits with status zero.
    RunCommand { command: String },

    /// Known type whose params could not be decoded.
    Invalid { check_type: String, reason: String },

    /// Type tag outside the catalog.
    Unknown { check_type: String },
}

impl CheckKind {
    /// Type tag as it appears in rubric and report documents.
    pub fn type_name(&self) -> &str {
        match self {
            CheckKind::CommandExists { .. } => "command_exists",
            CheckKind::OutputContains { .. } => "output_contains",
            CheckKind::FilesExist { .. } => "files_exist",
            CheckKind::DirsExist { .. } => "dirs_exist",
            CheckKind::EnvvarSet { .. } => "envvar_set",
            CheckKind::FileContains { .. } => "file_contains",
            CheckKind::RunCommand { .. } => "run_command",
            CheckKind::Invalid { check_type, .. } | CheckKind::Unknown { check_type } => {
                check_type
            }
        }
    }

    /// Whether the check runs a rubric-supplied command (and so gets a
    /// default timeout).
    pub fn runs_user_command(&self) -> bool {
        matches!(
            self,
            CheckKind::OutputContains { .. } | CheckKind::RunCommand { .. }
        )
    }

    /// Decode a type tag and its params map.
    pub fn decode(check_type: &str, params: &Map<String, Value>) -> Self {
        let decoded = match check_type {
            "command_exists" => {
                string_param(params, "name").map(|name| CheckKind::CommandExists { name })
            }
            "output_contains" => string_param(params, "command").and_then(|command| {
                literal_list(params, "contains")
                    .map(|contains| CheckKind::OutputContains { command, contains })
            }),
            "files_exist" => {
                path_list(params, "path").map(|paths| CheckKind::FilesExist { paths })
            }
            "dirs_exist" => path_list(params, "path").map(|paths| CheckKind::DirsExist { paths }),
            "envvar_set" => string_param(params, "name").and_then(|name| {
                if is_shell_identifier(&name) {
                    Ok(CheckKind::EnvvarSet { name })
                } else {
                    Err(format!("'{name}' is not a valid environment variable name"))
                }
            }),
            "file_contains" => string_param(params, "path").and_then(|path| {
                literal_list(params, "contains")
                    .map(|contains| CheckKind::FileContains { path, contains })
            }),
            "run_command" => {
                string_param(params, "command").map(|command| CheckKind::RunCommand { command })
            }
            other => {
                return CheckKind::Unknown {
                    check_type: other.to_string(),
                }
            }
        };

        decoded.unwrap_or_else(|reason| CheckKind::Invalid {
            check_type: check_type.to_string(),
            reason,
        })
    }
}

/// One declarative pass/fail check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Identifier used by `requires` references.
    pub id: String,
    pub kind: CheckKind,
    /// Points awarded when the check passes.
    pub score: u64,
    /// Declared timeout in seconds, if any.
    pub timeout_secs: Option<u64>,
    /// Ids that must have completed with a passing result first.
    pub requires: Vec<String>,
}

impl Check {
    /// Create a check with the default score, no timeout and no prerequisites.
    pub fn new(id: impl Into<String>, kind: CheckKind) -> Self {
        Self {
            id: id.into(),
            kind,
            score: DEFAULT_SCORE,
            timeout_secs: None,
            requires: Vec::new(),
        }
    }

    pub fn with_score(mut self, score: u64) -> Self {
        self.score = score;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_requires<I, S>(mut self, requires: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = requires.into_iter().map(Into::into).collect();
        self
    }

    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }

    /// Timeout bounding each runner call made for this check.
    ///
    /// A declared timeout always wins; otherwise command-running checks fall
    /// back to `default_command_timeout` and the rest run unbounded.
    pub fn effective_timeout(&self, default_command_timeout: Duration) -> Option<Duration> {
        match self.timeout_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None if self.kind.runs_user_command() => Some(default_command_timeout),
            None => None,
        }
    }

    fn from_raw(raw: RawCheck) -> Self {
        let check_type = match raw.check_type {
            Some(Value::String(t)) => t,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let params = match raw.params {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let kind = CheckKind::decode(&check_type, &params);
        let id = loose_id(raw.id).unwrap_or_else(|| derive_check_id(&check_type, &params));
        let score = loose_score(raw.score, &id);
        let timeout_secs = loose_timeout(raw.timeout, &id);

        Self {
            requires: loose_requires(raw.requires),
            id,
            kind,
            score,
            timeout_secs,
        }
    }
}

/// Ordered collection of checks for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    /// Target (repository) the rubric grades.
    pub target: String,
    pub checks: Vec<Check>,
}

impl Rubric {
    pub fn new(target: impl Into<String>, checks: Vec<Check>) -> Self {
        Self {
            target: target.into(),
            checks,
        }
    }

    /// Read and decode a rubric file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                GradeError::RubricNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                GradeError::RubricRead {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Self::from_json_str(&content).map_err(|source| GradeError::RubricParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Decode a rubric from JSON text.
    pub fn from_json_str(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: RawRubric = serde_json::from_str(json)?;
        Ok(Self {
            target: loose_id(raw.repo).unwrap_or_else(|| "unknown".to_string()),
            checks: raw
                .tests
                .unwrap_or_default()
                .into_iter()
                .map(Check::from_raw)
                .collect(),
        })
    }

    /// Replace the target name (e.g. with the one given on the command line).
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Sum of every declared score, regardless of outcome.
    pub fn max_score(&self) -> u64 {
        self.checks.iter().map(|c| c.score).sum()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawRubric {
    #[serde(default, alias = "target")]
    repo: Option<Value>,
    #[serde(default)]
    tests: Option<Vec<RawCheck>>,
}

/// Envelope as written. Every field stays a raw [`Value`] so a loose type
/// degrades to a default instead of failing the whole rubric.
#[derive(Debug, Deserialize)]
struct RawCheck {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "type", default)]
    check_type: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    score: Option<Value>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    requires: Option<Value>,
}

/// Strings as-is, other scalars by their JSON text; null and `""` are absent.
fn loose_id(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn loose_score(value: Option<Value>, check_id: &str) -> u64 {
    match value {
        None | Some(Value::Null) => DEFAULT_SCORE,
        Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
            (Some(score), _) => score,
            (None, Some(f)) if f.is_finite() && f >= 0.0 => f.round() as u64,
            _ => {
                warn!(check_id, score = %n, "negative score, using default");
                DEFAULT_SCORE
            }
        },
        Some(other) => {
            warn!(check_id, score = %other, "score is not a number, using default");
            DEFAULT_SCORE
        }
    }
}

/// Whole seconds, rounded up so a fractional timeout never shrinks.
fn loose_timeout(value: Option<Value>, check_id: &str) -> Option<u64> {
    match value? {
        Value::Null => None,
        Value::Number(n) => match (n.as_u64(), n.as_f64()) {
            (Some(secs), _) => Some(secs),
            (None, Some(f)) if f.is_finite() && f > 0.0 => Some(f.ceil() as u64),
            _ => {
                warn!(check_id, timeout = %n, "non-positive timeout ignored");
                None
            }
        },
        other => {
            warn!(check_id, timeout = %other, "timeout is not a number, ignored");
            None
        }
    }
}

/// A list of ids; anything that is not a list means no prerequisites.
fn loose_requires(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| loose_id(Some(item)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Deterministic id for a check that omits one.
///
/// Name-keyed checks read as `command_exists_git`; everything else gets a
/// short digest of the canonical params.
fn derive_check_id(check_type: &str, params: &Map<String, Value>) -> String {
    if matches!(check_type, "command_exists" | "envvar_set") {
        if let Some(Value::String(name)) = params.get("name") {
            return format!("{check_type}_{name}");
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(check_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(Value::Object(params.clone()).to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());

    let prefix = if check_type.is_empty() {
        "unknown"
    } else {
        check_type
    };
    format!("{prefix}_{}", &digest[..12])
}

fn string_param(params: &Map<String, Value>, key: &str) -> std::result::Result<String, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("param '{key}' must be a string, got {other}")),
    }
}

/// Literal list: scalars are accepted and matched by their JSON text.
fn literal_list(
    params: &Map<String, Value>,
    key: &str,
) -> std::result::Result<Vec<String>, String> {
    let items = match params.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(Value::String(s)) => return Ok(vec![s.clone()]),
        Some(other) => return Err(format!("param '{key}' must be a list, got {other}")),
    };

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(item.to_string()),
            other => Err(format!("param '{key}' contains a non-scalar item: {other}")),
        })
        .collect()
}

fn path_list(params: &Map<String, Value>, key: &str) -> std::result::Result<Vec<String>, String> {
    let items = match params.get(key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(Value::String(s)) => return Ok(vec![s.clone()]),
        Some(other) => return Err(format!("param '{key}' must be a list, got {other}")),
    };

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(format!("param '{key}' must contain only strings, got {other}")),
        })
        .collect()
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_load_applies_defaults() {
        let rubric = Rubric::from_json_str(
            r#"{"repo": "demo", "tests": [{"type": "command_exists", "params": {"name": "git"}}]}"#,
        )
        .unwrap();

        assert_eq!(rubric.target, "demo");
        let check = &rubric.checks[0];
        assert_eq!(check.score, DEFAULT_SCORE);
        assert!(check.requires.is_empty());
        assert_eq!(check.timeout_secs, None);
        assert_eq!(
            check.kind,
            CheckKind::CommandExists {
                name: "git".to_string()
            }
        );
    }

    #[test]
    fn test_missing_repo_and_tests() {
        let rubric = Rubric::from_json_str("{}").unwrap();
        assert_eq!(rubric.target, "unknown");
        assert!(rubric.is_empty());
    }

    #[test]
    fn test_target_alias_and_unknown_fields() {
        let rubric =
            Rubric::from_json_str(r#"{"target": "svc", "owner": "x", "tests": []}"#).unwrap();
        assert_eq!(rubric.target, "svc");
    }

    #[test]
    fn test_null_or_non_list_requires_means_none() {
        let rubric = Rubric::from_json_str(
            r#"{"tests": [
                {"id": "a", "type": "run_command", "params": {"command": "true"}, "requires": null},
                {"id": "b", "type": "run_command", "params": {"command": "true"}, "requires": "a"},
                {"id": "c", "type": "run_command", "params": {"command": "true"}, "requires": ["a", 7]}
            ]}"#,
        )
        .unwrap();

        assert!(rubric.checks[0].requires.is_empty());
        assert!(rubric.checks[1].requires.is_empty());
        assert_eq!(rubric.checks[2].requires, vec!["a".to_string(), "7".to_string()]);
    }

    #[test]
    fn test_fractional_timeout_rounds_up() {
        let rubric = Rubric::from_json_str(
            r#"{"tests": [
                {"id": "a", "type": "run_command", "params": {"command": "true"}, "timeout": 1.5},
                {"id": "b", "type": "run_command", "params": {"command": "true"}, "timeout": "soon"},
                {"id": "c", "type": "run_command", "params": {"command": "true"}, "timeout": -3}
            ]}"#,
        )
        .unwrap();

        assert_eq!(rubric.checks[0].timeout_secs, Some(2));
        assert_eq!(rubric.checks[1].timeout_secs, None);
        assert_eq!(rubric.checks[2].timeout_secs, None);
    }

    #[test]
    fn test_numeric_id_uses_json_text() {
        let rubric = Rubric::from_json_str(
            r#"{"tests": [
                {"id": 7, "type": "command_exists", "params": {"name": "git"}},
                {"id": "", "type": "command_exists", "params": {"name": "node"}},
                {"id": null, "type": "command_exists", "params": {"name": "make"}, "requires": [7]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(rubric.checks[0].id, "7");
        assert_eq!(rubric.checks[1].id, "command_exists_node");
        assert_eq!(rubric.checks[2].id, "command_exists_make");
        assert_eq!(rubric.checks[2].requires, vec!["7".to_string()]);
    }

    #[test]
    fn test_loose_score_falls_back_to_default() {
        let rubric = Rubric::from_json_str(
            r#"{"tests": [
                {"id": "a", "type": "run_command", "score": "high"},
                {"id": "b", "type": "run_command", "score": -2},
                {"id": "c", "type": "run_command", "score": 2.0},
                {"id": "d", "type": "run_command", "score": null}
            ]}"#,
        )
        .unwrap();

        let scores: Vec<u64> = rubric.checks.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![DEFAULT_SCORE, DEFAULT_SCORE, 2, DEFAULT_SCORE]);
    }

    #[test]
    fn test_loose_type_and_params() {
        let rubric = Rubric::from_json_str(r#"{"repo": 42, "tests": null}"#).unwrap();
        assert_eq!(rubric.target, "42");
        assert!(rubric.is_empty());

        let rubric =
            Rubric::from_json_str(r#"{"tests": [{"id": "a", "type": 3, "params": []}]}"#).unwrap();
        assert_eq!(
            rubric.checks[0].kind,
            CheckKind::Unknown {
                check_type: "3".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(Rubric::from_json_str("{\"tests\": [").is_err());
    }

    #[test]
    fn test_unknown_type_decodes_to_unknown() {
        let kind = CheckKind::decode("port_open", &Map::new());
        assert_eq!(
            kind,
            CheckKind::Unknown {
                check_type: "port_open".to_string()
            }
        );
        assert_eq!(kind.type_name(), "port_open");
    }

    #[test]
    fn test_wrong_param_shape_decodes_to_invalid() {
        let kind = CheckKind::decode("run_command", &params(json!({"command": 42})));
        match kind {
            CheckKind::Invalid { check_type, reason } => {
                assert_eq!(check_type, "run_command");
                assert!(reason.contains("command"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_envvar_name_must_be_identifier() {
        let ok = CheckKind::decode("envvar_set", &params(json!({"name": "JAVA_HOME"})));
        assert!(matches!(ok, CheckKind::EnvvarSet { .. }));

        let bad = CheckKind::decode("envvar_set", &params(json!({"name": "X; rm -rf /"})));
        assert!(matches!(bad, CheckKind::Invalid { .. }));

        let empty = CheckKind::decode("envvar_set", &Map::new());
        assert!(matches!(empty, CheckKind::Invalid { .. }));
    }

    #[test]
    fn test_contains_accepts_scalars() {
        let kind = CheckKind::decode(
            "output_contains",
            &params(json!({"command": "python --version", "contains": ["3.11", 3, true]})),
        );
        assert_eq!(
            kind,
            CheckKind::OutputContains {
                command: "python --version".to_string(),
                contains: vec!["3.11".to_string(), "3".to_string(), "true".to_string()],
            }
        );
    }

    #[test]
    fn test_single_path_string_is_promoted() {
        let kind = CheckKind::decode("files_exist", &params(json!({"path": "/app/main.py"})));
        assert_eq!(
            kind,
            CheckKind::FilesExist {
                paths: vec!["/app/main.py".to_string()]
            }
        );
    }

    #[test]
    fn test_derived_ids_are_deterministic() {
        let json = r#"{"tests": [
            {"type": "command_exists", "params": {"name": "node"}},
            {"type": "run_command", "params": {"command": "make test"}},
            {"type": "run_command", "params": {"command": "make test"}},
            {"type": "run_command", "params": {"command": "make lint"}}
        ]}"#;
        let rubric = Rubric::from_json_str(json).unwrap();

        assert_eq!(rubric.checks[0].id, "command_exists_node");
        assert!(rubric.checks[1].id.starts_with("run_command_"));
        assert_eq!(rubric.checks[1].id, rubric.checks[2].id);
        assert_ne!(rubric.checks[1].id, rubric.checks[3].id);
    }

    #[test]
    fn test_effective_timeout() {
        let default = Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS);

        let run = Check::new(
            "r",
            CheckKind::RunCommand {
                command: "true".to_string(),
            },
        );
        assert_eq!(run.effective_timeout(default), Some(default));
        assert_eq!(
            run.clone().with_timeout_secs(5).effective_timeout(default),
            Some(Duration::from_secs(5))
        );

        let files = Check::new("f", CheckKind::FilesExist { paths: vec![] });
        assert_eq!(files.effective_timeout(default), None);
    }

    #[test]
    fn test_max_score_sums_declared() {
        let rubric = Rubric::new(
            "demo",
            vec![
                Check::new("a", CheckKind::RunCommand { command: "true".into() }).with_score(2),
                Check::new("b", CheckKind::RunCommand { command: "true".into() }).with_score(3),
                Check::new("c", CheckKind::RunCommand { command: "true".into() }).with_score(0),
            ],
        );
        assert_eq!(rubric.max_score(), 5);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Rubric::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, GradeError::RubricNotFound { .. }));
    }
}
