//! Implementation of job specifications.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde::Serializer;

use crate::value::Value;

/// The default interval between two checks of a job.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// The default pattern used to extract a job handle from the submit output.
pub const DEFAULT_JOB_ID_PATTERN: &str = "Submitted batch job ([0-9]+)";

/// The compiled default job handle pattern.
static DEFAULT_JOB_ID_REGEX: LazyLock<Pattern> = LazyLock::new(|| {
    // SAFETY: this is checked statically with tests to always unwrap.
    Pattern::new(DEFAULT_JOB_ID_PATTERN).unwrap()
});

/// An error that occurs while populating a job specification.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// A mandatory field has no value.
    #[error("missing mandatory field `{0}`")]
    Missing(&'static str),
    /// A field has an unusable value.
    #[error("invalid value `{value}` for field `{field}`: {message}")]
    Invalid {
        /// The name of the field.
        field: &'static str,
        /// The offending value.
        value: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// A compiled regular expression that compares and serializes as its source.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// Compiles a new pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    /// Gets the compiled regular expression.
    pub fn regex(&self) -> &Regex {
        &self.0
    }

    /// Gets the source of the pattern.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Extracts a job handle from text.
    ///
    /// The first capture group is used if the pattern has one; otherwise the
    /// whole match is.
    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        let captures = self.0.captures(text)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
    }
}

impl Default for Pattern {
    fn default() -> Self {
        DEFAULT_JOB_ID_REGEX.clone()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Serializes a duration as a number of seconds.
fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// A fully materialized job, ready to be supervised.
///
/// A job specification is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, bon::Builder)]
pub struct JobSpec {
    /// The name of the job.
    ///
    /// This is also the name the job is submitted under, so it must be
    /// unique among the jobs managed together.
    #[builder(into)]
    pub name: String,
    /// The path of the template the configuration was rendered from.
    #[builder(into)]
    pub template: PathBuf,
    /// The rendered configuration text.
    #[builder(into, default)]
    pub rendered_config: String,
    /// The file the job writes its output to.
    #[builder(into)]
    pub output_file: PathBuf,
    /// The command that submits the job.
    #[builder(into)]
    pub cmd: String,
    /// The file the rendered configuration is written to.
    #[builder(into)]
    pub sbatch_script: PathBuf,
    /// The interval between two checks of the job.
    #[builder(default = DEFAULT_CHECK_INTERVAL)]
    #[serde(rename = "check_interval_secs", serialize_with = "serialize_secs")]
    pub check_interval: Duration,
    /// The command gating the submission of the job.
    ///
    /// The job is only submitted once the command prints `1`.
    #[builder(into)]
    pub start_condition_cmd: Option<String>,
    /// The pattern indicating the job finished when found in its output.
    pub termination_str: Option<Pattern>,
    /// The command indicating the job finished when it prints `1`.
    #[builder(into)]
    pub termination_cmd: Option<String>,
    /// The pattern extracting the job handle from the submit output.
    #[builder(default)]
    pub job_id_regexp: Pattern,
    /// Every resolved parameter of the job.
    #[builder(default)]
    pub params: IndexMap<String, Value>,
}

impl JobSpec {
    /// Creates a job specification from resolved parameters and its rendered
    /// configuration.
    ///
    /// Fields are populated from the parameters of the same name; parameters
    /// that are not fields are only kept in [`JobSpec::params`].
    pub fn from_params(
        params: IndexMap<String, Value>,
        rendered_config: String,
    ) -> Result<Self, FieldError> {
        let mut fields = Fields::default();
        for (name, value) in &params {
            if let Some((_, set)) = FIELDS.iter().find(|(field, _)| *field == name.as_str()) {
                set(&mut fields, value)?;
            }
        }

        Ok(Self {
            name: fields.name.unwrap_or_else(|| auto_name(&params)),
            template: fields.template.ok_or(FieldError::Missing("template"))?,
            rendered_config,
            output_file: fields.output_file.ok_or(FieldError::Missing("output_file"))?,
            cmd: fields.cmd.ok_or(FieldError::Missing("cmd"))?,
            sbatch_script: fields
                .sbatch_script
                .ok_or(FieldError::Missing("sbatch_script"))?,
            check_interval: fields.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL),
            start_condition_cmd: fields.start_condition_cmd,
            termination_str: fields.termination_str,
            termination_cmd: fields.termination_cmd,
            job_id_regexp: fields.job_id_regexp.unwrap_or_default(),
            params,
        })
    }

    /// Determines if the job can report that it finished.
    pub fn has_termination(&self) -> bool {
        self.termination_str.is_some() || self.termination_cmd.is_some()
    }
}

/// Derives a job name from its parameters.
///
/// The name is every `key=value` pair, in sorted key order, joined with `_`.
pub fn auto_name(params: &IndexMap<String, Value>) -> String {
    let mut pairs = params.iter().collect::<Vec<_>>();
    pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("_")
}

/// The fields of a job specification collected from parameters.
#[derive(Default)]
struct Fields {
    /// The `name` field.
    name: Option<String>,
    /// The `template` field.
    template: Option<PathBuf>,
    /// The `output_file` field.
    output_file: Option<PathBuf>,
    /// The `cmd` field.
    cmd: Option<String>,
    /// The `sbatch_script` field.
    sbatch_script: Option<PathBuf>,
    /// The `check_interval_secs` field.
    check_interval: Option<Duration>,
    /// The `start_condition_cmd` field.
    start_condition_cmd: Option<String>,
    /// The `termination_str` field.
    termination_str: Option<Pattern>,
    /// The `termination_cmd` field.
    termination_cmd: Option<String>,
    /// The `job_id_regexp` field.
    job_id_regexp: Option<Pattern>,
}

/// Sets a field from a parameter value.
type Setter = fn(&mut Fields, &Value) -> Result<(), FieldError>;

/// The registry of parameters that populate job specification fields.
static FIELDS: &[(&str, Setter)] = &[
    ("name", |f, v| {
        f.name = text(v);
        Ok(())
    }),
    ("template", |f, v| {
        f.template = text(v).map(PathBuf::from);
        Ok(())
    }),
    ("output_file", |f, v| {
        f.output_file = text(v).map(PathBuf::from);
        Ok(())
    }),
    ("cmd", |f, v| {
        f.cmd = text(v);
        Ok(())
    }),
    ("sbatch_script", |f, v| {
        f.sbatch_script = text(v).map(PathBuf::from);
        Ok(())
    }),
    ("check_interval_secs", |f, v| {
        f.check_interval = Some(interval(v)?);
        Ok(())
    }),
    ("start_condition_cmd", |f, v| {
        f.start_condition_cmd = text(v);
        Ok(())
    }),
    ("start_condition", |f, v| {
        f.start_condition_cmd = text(v);
        Ok(())
    }),
    ("termination_str", |f, v| {
        f.termination_str = pattern("termination_str", v)?;
        Ok(())
    }),
    ("termination_cmd", |f, v| {
        f.termination_cmd = text(v);
        Ok(())
    }),
    ("job_id_regexp", |f, v| {
        f.job_id_regexp = pattern("job_id_regexp", v)?;
        Ok(())
    }),
];

/// Converts a value to text, treating an empty value as absent.
fn text(value: &Value) -> Option<String> {
    let s = value.to_string();
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Converts a value to a regular expression, treating an empty value as
/// absent.
fn pattern(field: &'static str, value: &Value) -> Result<Option<Pattern>, FieldError> {
    text(value)
        .map(|s| {
            Pattern::new(&s).map_err(|e| FieldError::Invalid {
                field,
                value: s.clone(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// Converts a value to a check interval.
fn interval(value: &Value) -> Result<Duration, FieldError> {
    let invalid = |message: &str| FieldError::Invalid {
        field: "check_interval_secs",
        value: value.to_string(),
        message: message.to_string(),
    };

    let secs = match value {
        Value::Integer(i) => *i as f64,
        Value::Float(f) => *f,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("expected a number of seconds"))?,
        Value::Boolean(_) => return Err(invalid("expected a number of seconds")),
    };

    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid("the interval must be a positive number of seconds"));
    }

    let interval = Duration::try_from_secs_f64(secs).map_err(|e| invalid(&e.to_string()))?;
    if interval.is_zero() {
        return Err(invalid("the interval is too short to be represented"));
    }

    Ok(interval)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn params(entries: &[(&str, Value)]) -> IndexMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn required() -> Vec<(&'static str, Value)> {
        vec![
            ("template", Value::from("job.tpl")),
            ("output_file", Value::from("out/job.log")),
            ("cmd", Value::from("sbatch job.sbatch")),
            ("sbatch_script", Value::from("job.sbatch")),
        ]
    }

    #[test]
    fn default_pattern() {
        let pattern = Pattern::default();
        assert_eq!(pattern.as_str(), DEFAULT_JOB_ID_PATTERN);
        assert_eq!(pattern.extract("Submitted batch job 1234\n"), Some("1234"));
        assert_eq!(pattern.extract("sbatch: error: invalid partition"), None);
    }

    #[test]
    fn pattern_without_group() {
        let pattern = Pattern::new("[0-9]+").unwrap();
        assert_eq!(pattern.extract("job 42 queued"), Some("42"));
    }

    #[test]
    fn populates_fields() {
        let mut entries = required();
        entries.extend([
            ("name", Value::from("run-1")),
            ("check_interval_secs", Value::Integer(60)),
            ("start_condition", Value::from("echo 1")),
            ("termination_str", Value::from("DONE|FINISHED")),
            ("termination_cmd", Value::from("")),
            ("lr", Value::Float(0.1)),
        ]);

        let job = JobSpec::from_params(params(&entries), "config".into()).unwrap();
        assert_eq!(job.name, "run-1");
        assert_eq!(job.template, PathBuf::from("job.tpl"));
        assert_eq!(job.rendered_config, "config");
        assert_eq!(job.check_interval, Duration::from_secs(60));
        assert_eq!(job.start_condition_cmd.as_deref(), Some("echo 1"));
        assert_eq!(
            job.termination_str.as_ref().map(Pattern::as_str),
            Some("DONE|FINISHED")
        );
        assert_eq!(job.termination_cmd, None);
        assert_eq!(job.job_id_regexp, Pattern::default());
        assert_eq!(job.params["lr"], Value::Float(0.1));
        assert!(job.has_termination());
    }

    #[test]
    fn defaults() {
        let job = JobSpec::from_params(params(&required()), String::new()).unwrap();
        assert_eq!(job.check_interval, DEFAULT_CHECK_INTERVAL);
        assert!(!job.has_termination());
        assert_eq!(
            job.name,
            "cmd=sbatch job.sbatch_output_file=out/job.log_sbatch_script=job.sbatch_template=job.tpl"
        );
    }

    #[test]
    fn missing_fields() {
        for field in ["template", "output_file", "cmd", "sbatch_script"] {
            let entries = required()
                .into_iter()
                .filter(|(name, _)| *name != field)
                .collect::<Vec<_>>();
            let e = JobSpec::from_params(params(&entries), String::new()).unwrap_err();
            assert!(
                matches!(e, FieldError::Missing(f) if f == field),
                "unexpected error: {e}"
            );
        }
    }

    #[test]
    fn invalid_fields() {
        let mut entries = required();
        entries.push(("check_interval_secs", Value::from("soon")));
        let e = JobSpec::from_params(params(&entries), String::new()).unwrap_err();
        assert!(e.to_string().contains("check_interval_secs"), "{e}");

        let mut entries = required();
        entries.push(("termination_str", Value::from("(unclosed")));
        let e = JobSpec::from_params(params(&entries), String::new()).unwrap_err();
        assert!(e.to_string().contains("termination_str"), "{e}");

        for secs in [1e300, 1e-12, -1.0, f64::NAN] {
            let mut entries = required();
            entries.push(("check_interval_secs", Value::Float(secs)));
            let e = JobSpec::from_params(params(&entries), String::new()).unwrap_err();
            assert!(
                matches!(e, FieldError::Invalid { field: "check_interval_secs", .. }),
                "unexpected error for `{secs}`: {e}"
            );
        }
    }

    #[test]
    fn auto_names() {
        let a = params(&[("b", Value::Integer(1)), ("a", Value::from("x"))]);
        let b = params(&[("a", Value::from("x")), ("b", Value::Integer(2))]);
        assert_eq!(auto_name(&a), "a=x_b=1");
        assert_ne!(auto_name(&a), auto_name(&b));
        assert_eq!(auto_name(&a), auto_name(&a.clone()));
    }
}
