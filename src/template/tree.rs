//! Implementation of the combinator tree.
//!
//! An experiment configuration is parsed once into a [`Node`] tree, which is
//! then expanded into every [`Binding`] it describes:
//!
//! * a mapping combines its keys as a cartesian product;
//! * a list of scalars enumerates one binding per element;
//! * a list of single-key mappings enumerates named alternatives, each
//!   expanding to its own sub-combinations;
//! * a scalar yields exactly one binding.

use std::fmt;

use itertools::Itertools;
use serde_yaml_ng::Value as YamlValue;

use crate::value::Value;
use crate::value::ValueError;

/// An error that occurs while parsing a combinator tree.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A list mixes scalars and alternatives (or contains other shapes).
    #[error(
        "ambiguous list shape at `{path}`: expected either a list of scalars or a list of \
         single-key alternatives"
    )]
    AmbiguousList {
        /// The path of the offending list.
        path: KeyPath,
    },
    /// A mapping key is not a scalar.
    #[error("unsupported key at `{path}`: mapping keys must be scalars")]
    Key {
        /// The path of the mapping containing the key.
        path: KeyPath,
    },
    /// A scalar could not be converted.
    #[error("invalid value at `{path}`: {source}")]
    Value {
        /// The path of the offending value.
        path: KeyPath,
        /// The conversion error.
        #[source]
        source: ValueError,
    },
}

/// A dotted path of keys into the configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Gets the last segment of the path.
    ///
    /// This is the name of the parameter an entry assigns.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }

        write!(f, "{}", self.0.join("."))
    }
}

impl<S: Into<String>> FromIterator<S> for KeyPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A single path-tagged assignment within a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The path where the value was declared.
    pub path: KeyPath,
    /// The assigned value.
    pub value: Value,
}

/// One combination of assignments produced by expanding a tree.
///
/// Entries are kept in declaration order; when two entries collapse to the
/// same parameter name, the later one wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding(Vec<Entry>);

impl Binding {
    /// Gets the entries of the binding.
    pub fn entries(&self) -> &[Entry] {
        &self.0
    }

    /// Consumes the binding and returns its entries.
    pub fn into_entries(self) -> Vec<Entry> {
        self.0
    }
}

/// Represents a node of the combinator tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A terminal value.
    Scalar(Value),
    /// A list of terminal values; one is chosen per binding.
    Choices(Vec<Value>),
    /// A list of named alternatives; one is chosen per binding.
    Alternatives(Vec<(String, Node)>),
    /// A mapping whose keys vary independently.
    Mapping(Vec<(String, Node)>),
}

impl Node {
    /// Parses a combinator tree from a YAML value.
    pub fn parse(value: &YamlValue) -> Result<Self, TreeError> {
        Self::parse_at(value, &mut Vec::new())
    }

    /// Parses a node located at the given path.
    fn parse_at(value: &YamlValue, path: &mut Vec<String>) -> Result<Self, TreeError> {
        let key_path = |path: &Vec<String>| KeyPath(path.clone());

        match value {
            YamlValue::Mapping(mapping) => {
                let mut children = Vec::with_capacity(mapping.len());
                for (key, value) in mapping {
                    let key = scalar_key(key).ok_or_else(|| TreeError::Key {
                        path: key_path(path),
                    })?;
                    path.push(key.clone());
                    let child = Self::parse_at(value, path);
                    path.pop();
                    children.push((key, child?));
                }

                Ok(Self::Mapping(children))
            }
            YamlValue::Sequence(elements) => {
                // An empty list contributes nothing, which is the identity of the product
                if elements.is_empty() {
                    return Ok(Self::Mapping(Vec::new()));
                }

                if elements
                    .iter()
                    .all(|e| !matches!(e, YamlValue::Sequence(_) | YamlValue::Mapping(_)))
                {
                    let values = elements
                        .iter()
                        .map(|e| scalar(e, path))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(Self::Choices(values));
                }

                let mut alternatives = Vec::with_capacity(elements.len());
                for element in elements {
                    let Some((key, value)) = element
                        .as_mapping()
                        .filter(|m| m.len() == 1)
                        .and_then(|m| m.iter().next())
                    else {
                        return Err(TreeError::AmbiguousList {
                            path: key_path(path),
                        });
                    };

                    let key = scalar_key(key).ok_or_else(|| TreeError::Key {
                        path: key_path(path),
                    })?;
                    path.push(key.clone());
                    let child = Self::parse_at(value, path);
                    path.pop();
                    alternatives.push((key, child?));
                }

                Ok(Self::Alternatives(alternatives))
            }
            _ => Ok(Self::Scalar(scalar(value, path)?)),
        }
    }

    /// Expands the tree into every binding it describes.
    ///
    /// The order of the returned bindings follows the declaration order of
    /// mapping keys and list elements.
    pub fn combinations(&self) -> Vec<Binding> {
        self.expand(&mut Vec::new())
    }

    /// Expands the node located at the given path.
    fn expand(&self, path: &mut Vec<String>) -> Vec<Binding> {
        match self {
            Self::Scalar(value) => vec![Binding(vec![Entry {
                path: KeyPath(path.clone()),
                value: value.clone(),
            }])],
            Self::Choices(values) => values
                .iter()
                .map(|value| {
                    Binding(vec![Entry {
                        path: KeyPath(path.clone()),
                        value: value.clone(),
                    }])
                })
                .collect(),
            Self::Mapping(children) => {
                if children.is_empty() {
                    return vec![Binding::default()];
                }

                let axes = children
                    .iter()
                    .map(|(key, child)| {
                        path.push(key.clone());
                        let bindings = child.expand(path);
                        path.pop();
                        bindings
                    })
                    .collect::<Vec<_>>();

                axes.into_iter()
                    .multi_cartesian_product()
                    .map(|combination| {
                        Binding(
                            combination
                                .into_iter()
                                .flat_map(Binding::into_entries)
                                .collect(),
                        )
                    })
                    .collect()
            }
            Self::Alternatives(alternatives) => {
                let mut bindings = Vec::new();
                for (name, child) in alternatives {
                    path.push(name.clone());
                    let expanded = child.expand(path);
                    path.pop();

                    bindings.extend(expanded.into_iter().map(|binding| {
                        let mut entries = Vec::with_capacity(binding.0.len() + 1);

                        // The key holding the alternatives records which one was chosen
                        if !path.is_empty() {
                            entries.push(Entry {
                                path: KeyPath(path.clone()),
                                value: Value::String(name.clone()),
                            });
                        }

                        entries.extend(binding.0);
                        Binding(entries)
                    }));
                }

                bindings
            }
        }
    }
}

/// Converts a YAML mapping key into a string.
fn scalar_key(key: &YamlValue) -> Option<String> {
    match key {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Bool(_) | YamlValue::Number(_) => {
            Value::from_yaml(key).ok().flatten().map(|v| v.to_string())
        }
        _ => None,
    }
}

/// Converts a YAML scalar into a value.
fn scalar(value: &YamlValue, path: &[String]) -> Result<Value, TreeError> {
    Value::from_yaml(value)
        .map_err(|source| TreeError::Value {
            path: KeyPath(path.to_vec()),
            source,
        })?
        .ok_or_else(|| TreeError::AmbiguousList {
            path: KeyPath(path.to_vec()),
        })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(source: &str) -> Node {
        Node::parse(&serde_yaml_ng::from_str(source).unwrap()).unwrap()
    }

    fn names(binding: &Binding) -> Vec<(String, String)> {
        binding
            .entries()
            .iter()
            .map(|e| (e.path.to_string(), e.value.to_string()))
            .collect()
    }

    #[test]
    fn scalar_yields_single_binding() {
        let node = parse("lr: 0.1");
        let bindings = node.combinations();
        assert_eq!(bindings.len(), 1);
        assert_eq!(names(&bindings[0]), [("lr".to_string(), "0.1".to_string())]);
    }

    #[test]
    fn mapping_is_a_product() {
        let node = parse(
            r#"
a: [1, 2]
b: [x, y]
c: [true, false]
"#,
        );
        let bindings = node.combinations();
        assert_eq!(bindings.len(), 8);

        // The first axis varies slowest
        assert_eq!(
            names(&bindings[0]),
            [
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "x".to_string()),
                ("c".to_string(), "true".to_string()),
            ]
        );
        assert_eq!(
            names(&bindings[7]),
            [
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "y".to_string()),
                ("c".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn alternatives_are_a_union() {
        let node = parse(
            r#"
model:
  - small:
      layers: [2, 4]
  - large:
      layers: 24
      width: [512, 1024, 2048]
"#,
        );
        let bindings = node.combinations();
        assert_eq!(bindings.len(), 2 + 3);
        assert_eq!(
            names(&bindings[0]),
            [
                ("model".to_string(), "small".to_string()),
                ("model.small.layers".to_string(), "2".to_string()),
            ]
        );
        assert_eq!(
            names(&bindings[4]),
            [
                ("model".to_string(), "large".to_string()),
                ("model.large.layers".to_string(), "24".to_string()),
                ("model.large.width".to_string(), "2048".to_string()),
            ]
        );
    }

    #[test]
    fn alternative_with_scalar_value() {
        let node = parse("opt: [{adam: 0.001}, {sgd: 0.1}]");
        let bindings = node.combinations();
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            names(&bindings[1]),
            [
                ("opt".to_string(), "sgd".to_string()),
                ("opt.sgd".to_string(), "0.1".to_string()),
            ]
        );
    }

    #[test]
    fn empty_nodes_are_identity() {
        assert_eq!(parse("{}").combinations(), [Binding::default()]);

        let bindings = parse("a: []\nb: [1, 2]").combinations();
        assert_eq!(bindings.len(), 2);
        assert_eq!(names(&bindings[0]), [("b".to_string(), "1".to_string())]);
    }

    #[test]
    fn ambiguous_lists_are_rejected() {
        for source in [
            "a: [1, {b: 2}]",
            "a: [{b: 1, c: 2}]",
            "a: [[1, 2]]",
        ] {
            let value = serde_yaml_ng::from_str(source).unwrap();
            let e = Node::parse(&value).unwrap_err();
            assert!(
                matches!(e, TreeError::AmbiguousList { .. }),
                "unexpected error for `{source}`: {e}"
            );
            assert!(e.to_string().contains("at `a`"), "{e}");
        }
    }

    #[test]
    fn product_size_grows_exponentially() {
        for n in 0..6 {
            let source = (0..n)
                .map(|i| format!("axis{i}: [a, b]"))
                .collect::<Vec<_>>()
                .join("\n");
            let value = if source.is_empty() {
                YamlValue::Mapping(Default::default())
            } else {
                serde_yaml_ng::from_str(&source).unwrap()
            };
            let node = Node::parse(&value).unwrap();
            assert_eq!(node.combinations().len(), 1 << n);
        }
    }
}
