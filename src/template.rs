//! Implementation of the experiment template expander.
//!
//! An experiment is a YAML document describing a combinator tree of
//! parameters (see [`tree`]). Every binding the tree describes becomes one
//! [`JobSpec`]:
//!
//! 1. the binding is flattened to parameter names, pulling in any named
//!    preset from the top-level `defs` mapping;
//! 2. cross references and `expr(...)` values are resolved to a fixed point;
//! 3. the template named by the `template` parameter is rendered;
//! 4. the job specification fields are populated from the parameters.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_yaml_ng::Value as YamlValue;
use tracing::debug;
use tracing::warn;

use crate::value::Value;

pub mod expr;
pub mod job;
pub mod placeholder;
pub mod resolve;
pub mod tree;

pub use job::JobSpec;
use resolve::ResolveError;
use tree::Binding;
use tree::Node;
use tree::TreeError;

/// The top-level key holding named presets.
const DEFS_KEY: &str = "defs";

/// An error that occurs while expanding an experiment.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The experiment file could not be read.
    #[error("failed to read experiment `{path}`")]
    Read {
        /// The path of the experiment.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The experiment is not valid YAML.
    #[error("failed to parse experiment")]
    Parse(#[source] serde_yaml_ng::Error),
    /// The experiment is not a valid combinator tree.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// The `defs` section is not a mapping of presets.
    #[error("`{DEFS_KEY}` must be a mapping of preset names to parameters")]
    Defs,
    /// A preset is not a valid combinator tree.
    #[error("invalid preset `{name}`")]
    Preset {
        /// The name of the preset.
        name: String,
        /// The tree error.
        #[source]
        source: TreeError,
    },
    /// A preset describes more than one binding.
    #[error("preset `{name}` must describe a single set of parameters but describes {count}")]
    PresetShape {
        /// The name of the preset.
        name: String,
        /// The number of bindings the preset describes.
        count: usize,
    },
    /// A parameter expression is invalid.
    #[error("failed to resolve parameters of job `{job}`")]
    Resolve {
        /// The name of the job.
        job: String,
        /// The resolution error.
        #[source]
        source: ResolveError,
    },
    /// The template could not be read.
    #[error("failed to read template `{path}` of job `{job}`")]
    Template {
        /// The name of the job.
        job: String,
        /// The path of the template.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The template references an unknown parameter.
    #[error("template `{path}` of job `{job}` references unknown parameter `{name}`")]
    Render {
        /// The name of the job.
        job: String,
        /// The path of the template.
        path: PathBuf,
        /// The name of the unknown parameter.
        name: String,
    },
    /// A job specification field is missing or invalid.
    #[error("invalid job `{job}`")]
    Field {
        /// The name of the job.
        job: String,
        /// The field error.
        #[source]
        source: job::FieldError,
    },
}

/// Keeps only the bindings whose parameter `key` renders as `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The parameter name.
    pub key: String,
    /// The expected value.
    pub value: String,
}

impl Selection {
    /// Determines if the given resolved parameters are selected.
    fn matches(&self, params: &IndexMap<String, Value>) -> bool {
        params
            .get(&self.key)
            .is_some_and(|v| v.to_string() == self.value)
    }
}

impl FromStr for Selection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok(Self {
                key: key.trim().to_string(),
                value: value.to_string(),
            }),
            _ => Err(format!("invalid selection `{s}`: expected `KEY=VALUE`")),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{key}={value}", key = self.key, value = self.value)
    }
}

/// Expands the experiment at the given path into job specifications.
///
/// Relative template paths are resolved against the directory containing
/// the experiment.
pub fn expand(path: &Path, selections: &[Selection]) -> Result<Vec<JobSpec>, TemplateError> {
    let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let jobs = expand_str(&source, base_dir, selections)?;
    debug!(
        "expanded {count} job(s) from `{path}`",
        count = jobs.len(),
        path = path.display()
    );
    Ok(jobs)
}

/// Expands an experiment from its source into job specifications.
///
/// Relative template paths are resolved against the given directory.
pub fn expand_str(
    source: &str,
    base_dir: &Path,
    selections: &[Selection],
) -> Result<Vec<JobSpec>, TemplateError> {
    let mut document: YamlValue = serde_yaml_ng::from_str(source).map_err(TemplateError::Parse)?;
    let presets = take_presets(&mut document)?;
    let root = Node::parse(&document)?;

    let mut templates = HashMap::new();
    let mut jobs = Vec::new();
    for binding in root.combinations() {
        let params = flatten(binding, &presets);
        let provisional = provisional_name(&params);
        let resolution = resolve::resolve(params).map_err(|source| TemplateError::Resolve {
            job: provisional,
            source,
        })?;

        if !selections.iter().all(|s| s.matches(&resolution.params)) {
            continue;
        }

        // Escaped braces are only unescaped once resolution is complete
        let params = resolution
            .params
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => (name, Value::String(placeholder::unescape(&s))),
                value => (name, value),
            })
            .collect::<IndexMap<_, _>>();

        let job_name = provisional_name(&params);
        if !resolution.unresolved.is_empty() {
            warn!(
                "job `{job_name}` has unresolved parameters: {names}",
                names = resolution.unresolved.join(", ")
            );
        }

        let template_path = params
            .get("template")
            .map(|v| v.to_string())
            .filter(|s| !s.trim().is_empty())
            .map(|s| base_dir.join(s))
            .ok_or_else(|| TemplateError::Field {
                job: job_name.clone(),
                source: job::FieldError::Missing("template"),
            })?;

        if !templates.contains_key(&template_path) {
            let text = std::fs::read_to_string(&template_path).map_err(|source| {
                TemplateError::Template {
                    job: job_name.clone(),
                    path: template_path.clone(),
                    source,
                }
            })?;
            templates.insert(template_path.clone(), text);
        }

        let template = &templates[&template_path];
        let rendered = placeholder::render(template, |name| params.get(name).map(|v| v.to_string()))
            .map_err(|name| TemplateError::Render {
                job: job_name.clone(),
                path: template_path.clone(),
                name: name.to_string(),
            })?;

        let mut job = JobSpec::from_params(params, rendered).map_err(|source| {
            TemplateError::Field {
                job: job_name.clone(),
                source,
            }
        })?;
        job.template = template_path;
        jobs.push(job);
    }

    Ok(jobs)
}

/// Removes the `defs` section from the document and parses its presets.
fn take_presets(
    document: &mut YamlValue,
) -> Result<IndexMap<String, IndexMap<String, Value>>, TemplateError> {
    let Some(defs) = document
        .as_mapping_mut()
        .and_then(|m| m.shift_remove(DEFS_KEY))
    else {
        return Ok(IndexMap::new());
    };

    let YamlValue::Mapping(defs) = defs else {
        return Err(TemplateError::Defs);
    };

    let mut presets = IndexMap::new();
    for (name, value) in &defs {
        let name = match name {
            YamlValue::String(s) => s.clone(),
            _ => return Err(TemplateError::Defs),
        };

        let node = Node::parse(value).map_err(|source| TemplateError::Preset {
            name: name.clone(),
            source,
        })?;

        let mut bindings = node.combinations();
        if bindings.len() != 1 {
            return Err(TemplateError::PresetShape {
                name,
                count: bindings.len(),
            });
        }

        let params = bindings
            .pop()
            .map(|b| flatten(b, &IndexMap::new()))
            .unwrap_or_default();
        presets.insert(name, params);
    }

    Ok(presets)
}

/// Flattens a binding to parameter names.
///
/// Later entries replace earlier ones. A string value naming a preset pulls
/// in the preset's parameters right after it.
fn flatten(
    binding: Binding,
    presets: &IndexMap<String, IndexMap<String, Value>>,
) -> IndexMap<String, Value> {
    let mut params = IndexMap::new();
    for entry in binding.into_entries() {
        let Some(name) = entry.path.last().map(str::to_string) else {
            continue;
        };

        let preset = entry.value.as_str().and_then(|s| presets.get(s));
        params.insert(name, entry.value);
        if let Some(preset) = preset {
            params.extend(preset.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    params
}

/// Gets a name identifying a binding in diagnostics.
fn provisional_name(params: &IndexMap<String, Value>) -> String {
    params
        .get("name")
        .map(|v| v.to_string())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| job::auto_name(params))
}
