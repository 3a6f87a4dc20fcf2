//! Prototypes and the prototype index
//!
//! A prototype is a parameterized component template. Its metadata lives in
//! a comment header at the top of the template file:
//!
//! ```text
//! // @apiVersion 0.1
//! // @name io.ksonnet.pkg.redis-stateless
//! // @description Redis without persistent storage.
//! //   Continuation lines extend the previous directive.
//! // @shortDescription Redis without persistence.
//! // @param name string Name of the deployment
//! // @optionalParam replicas number 1 Number of replicas
//! // @alias redis
//! ```
//!
//! Names are dotted (`io.ksonnet.pkg.redis-stateless`). Lookups match whole
//! trailing segments first, so `redis-stateless` finds the prototype above
//! while `stateless` does not.
//!
//! Templates read their parameters as `params.<name>`. The older
//! `import 'param://<name>'` form is rewritten to that on expansion.

pub mod system;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::params;

static PARAM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s+['"]param://([A-Za-z0-9_]+)['"]"#).expect("valid param import pattern")
});

/// A parameter a prototype accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    /// Default for optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub description: String,
}

impl ParamSpec {
    /// Decode a command-line value; `string` parameters are taken verbatim
    fn decode(&self, raw: &str) -> Value {
        params::decode(raw, self.param_type == "string")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prototype {
    pub name: String,
    pub description: String,
    pub short_description: String,
    pub required_params: Vec<ParamSpec>,
    pub optional_params: Vec<ParamSpec>,
    pub aliases: Vec<String>,
    /// Template body following the header
    #[serde(skip)]
    pub template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Description,
    ShortDescription,
    Param,
    OptionalParam,
    Other,
}

impl Prototype {
    /// Parse a prototype from its source text
    ///
    /// `source_name` only appears in errors.
    pub fn parse(source_name: &str, source: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidPrototype {
            source_name: source_name.to_string(),
            reason,
        };

        let mut name = None;
        let mut description = String::new();
        let mut short_description = String::new();
        let mut required_params: Vec<ParamSpec> = Vec::new();
        let mut optional_params: Vec<ParamSpec> = Vec::new();
        let mut aliases = Vec::new();
        let mut last = Directive::Other;

        let mut lines = source.lines().peekable();
        while let Some(&line) = lines.peek() {
            let trimmed = line.trim();
            let Some(comment) = trimmed.strip_prefix("//") else {
                break;
            };
            lines.next();

            let comment = comment.trim();
            let Some(directive) = comment.strip_prefix('@') else {
                // Continuation of a multi-line description
                if !comment.is_empty() {
                    let target = match last {
                        Directive::Description => Some(&mut description),
                        Directive::ShortDescription => Some(&mut short_description),
                        Directive::Param => required_params
                            .last_mut()
                            .map(|p: &mut ParamSpec| &mut p.description),
                        Directive::OptionalParam => {
                            optional_params.last_mut().map(|p| &mut p.description)
                        }
                        Directive::Other => None,
                    };
                    if let Some(target) = target {
                        if !target.is_empty() {
                            target.push(' ');
                        }
                        target.push_str(comment);
                    }
                }
                continue;
            };

            let (keyword, rest) = match directive.split_once(char::is_whitespace) {
                Some((keyword, rest)) => (keyword, rest.trim()),
                None => (directive, ""),
            };

            last = match keyword {
                "name" => {
                    if rest.is_empty() {
                        return Err(invalid("@name is empty".to_string()));
                    }
                    name = Some(rest.to_string());
                    Directive::Other
                }
                "description" => {
                    description = rest.to_string();
                    Directive::Description
                }
                "shortDescription" => {
                    short_description = rest.to_string();
                    Directive::ShortDescription
                }
                "param" => {
                    let mut parts = rest.splitn(3, char::is_whitespace);
                    let (Some(param), Some(param_type)) = (parts.next(), parts.next()) else {
                        return Err(invalid(format!(
                            "@param needs a name and a type: '{rest}'"
                        )));
                    };
                    required_params.push(ParamSpec {
                        name: param.to_string(),
                        param_type: param_type.to_string(),
                        default: None,
                        description: parts.next().unwrap_or("").trim().to_string(),
                    });
                    Directive::Param
                }
                "optionalParam" => {
                    let mut parts = rest.splitn(4, char::is_whitespace);
                    let (Some(param), Some(param_type), Some(default)) =
                        (parts.next(), parts.next(), parts.next())
                    else {
                        return Err(invalid(format!(
                            "@optionalParam needs a name, a type and a default: '{rest}'"
                        )));
                    };
                    optional_params.push(ParamSpec {
                        name: param.to_string(),
                        param_type: param_type.to_string(),
                        default: Some(default.to_string()),
                        description: parts.next().unwrap_or("").trim().to_string(),
                    });
                    Directive::OptionalParam
                }
                "alias" => {
                    aliases.extend(rest.split_whitespace().map(str::to_string));
                    Directive::Other
                }
                _ => Directive::Other,
            };
        }

        let name = name.ok_or_else(|| invalid("missing @name".to_string()))?;
        let template: Vec<&str> = lines.collect();

        Ok(Self {
            name,
            description,
            short_description,
            required_params,
            optional_params,
            aliases,
            template: template.join("\n").trim_start_matches('\n').to_string(),
        })
    }

    /// Short description, or the first line of the description
    pub fn summary(&self) -> &str {
        if !self.short_description.is_empty() {
            return &self.short_description;
        }
        self.description.lines().next().unwrap_or("").trim()
    }

    /// Parameter values for `component` generated from this prototype
    ///
    /// A required `name` defaults to `component`. Other required parameters
    /// must appear in `given`; optional ones fall back to their defaults.
    /// When a parameter is given twice the last value wins.
    pub fn bind_params(&self, component: &str, given: &[(String, String)]) -> Result<Mapping> {
        let invalid = |reason: String| Error::PrototypeParams {
            prototype: self.name.clone(),
            reason,
        };

        let declared = |name: &str| {
            self.required_params
                .iter()
                .chain(&self.optional_params)
                .any(|spec| spec.name == name)
        };
        if let Some((unknown, _)) = given.iter().find(|(key, _)| !declared(key)) {
            return Err(invalid(format!("unknown parameter '{unknown}'")));
        }
        let lookup = |name: &str| {
            given
                .iter()
                .rev()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let mut params = Mapping::new();
        let mut missing = Vec::new();
        for spec in &self.required_params {
            let raw = match lookup(&spec.name) {
                Some(raw) => raw,
                None if spec.name == "name" => component,
                None => {
                    missing.push(spec.name.as_str());
                    continue;
                }
            };
            params.insert(Value::String(spec.name.clone()), spec.decode(raw));
        }
        if !missing.is_empty() {
            return Err(invalid(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }

        for spec in &self.optional_params {
            let raw = lookup(&spec.name)
                .or(spec.default.as_deref())
                .unwrap_or_default();
            params.insert(Value::String(spec.name.clone()), spec.decode(raw));
        }
        Ok(params)
    }

    /// Jsonnet source for `component`, reading its parameters from the app
    pub fn expand(&self, component: &str) -> String {
        let body = PARAM_IMPORT.replace_all(&self.template, "params.${1}");
        format!(
            "local env = std.extVar(\"__ksonnet/environments\");\nlocal params = std.extVar(\"__ksonnet/params\").components[\"{component}\"];\n{}\n",
            body.trim_end()
        )
    }

    fn matches(&self, query: &str, mode: SearchMode) -> bool {
        match mode {
            SearchMode::Suffix => {
                self.name == query
                    || self
                        .name
                        .strip_suffix(query)
                        .is_some_and(|head| head.ends_with('.'))
            }
            SearchMode::Substring => self.name.contains(query),
        }
    }
}

/// How [`Index::search_names`] compares names against a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Name equals the query or ends with `.<query>`
    Suffix,
    /// Name contains the query anywhere
    Substring,
}

/// Prototypes keyed by unique name
#[derive(Debug, Clone, Default)]
pub struct Index {
    prototypes: BTreeMap<String, Prototype>,
}

impl Index {
    pub fn new(prototypes: impl IntoIterator<Item = Prototype>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for prototype in prototypes {
            if map.contains_key(&prototype.name) {
                return Err(Error::DuplicatePrototype(prototype.name));
            }
            map.insert(prototype.name.clone(), prototype);
        }
        Ok(Self { prototypes: map })
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Prototype> {
        self.prototypes.get(name)
    }

    /// All prototypes sorted by name
    pub fn list(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.values()
    }

    /// Prototypes whose names match `query`, sorted by name
    pub fn search_names(&self, query: &str, mode: SearchMode) -> Vec<&Prototype> {
        self.prototypes
            .values()
            .filter(|p| p.matches(query, mode))
            .collect()
    }

    /// Find the single prototype `query` names
    ///
    /// Segment-suffix matches are tried first. When none exist, substring
    /// matches are reported as hints but never chosen.
    pub fn find_unique(&self, query: &str) -> Result<&Prototype> {
        let suffix = self.search_names(query, SearchMode::Suffix);
        match suffix.as_slice() {
            [only] => return Ok(*only),
            [] => {}
            many => {
                return Err(Error::AmbiguousPrototype {
                    query: query.to_string(),
                    candidates: many.iter().map(|p| p.name.clone()).collect(),
                })
            }
        }

        let partial_matches = self
            .search_names(query, SearchMode::Substring)
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        Err(Error::NoSuchPrototype {
            query: query.to_string(),
            partial_matches,
        })
    }
}
