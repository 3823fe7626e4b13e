//! Tool schema generation.
//!
//! A tool declares a [`Signature`]: its name, a Google-style docstring and a
//! list of typed parameters. [`generate_descriptor`] turns that into the
//! [`ToolDescriptor`] handed to the model. Parameter types are taken from the
//! Rust type each [`Param`] is declared with, so a tool cannot advertise a
//! type the model has no JSON-schema name for.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchemaError {
    #[error("tool `{tool}` must have a docstring with a description in the first line to be converted to a tool schema")]
    MissingDescription { tool: String },
    #[error("tool `{tool}` parameter `{param}` has unsupported type `{type_name}`")]
    UnsupportedType {
        tool: String,
        param: String,
        type_name: String,
    },
    #[error("tool `{tool}` parameter `{param}` is not documented in the docstring")]
    MissingParamDoc { tool: String, param: String },
    #[error("invalid signature for tool `{tool}`: {reason}")]
    InvalidSignature { tool: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    /// Maps a Rust type name (as reported by `std::any::type_name`) to its
    /// JSON-schema type. Returns `None` for anything outside the four
    /// supported scalar kinds.
    pub fn from_type_name(type_name: &str) -> Option<Self> {
        match type_name {
            "&str" | "str" | "alloc::string::String" | "std::string::String" => Some(ParamType::String),
            "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128" | "usize" => {
                Some(ParamType::Integer)
            }
            "f32" | "f64" => Some(ParamType::Number),
            "bool" => Some(ParamType::Boolean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_name: &'static str,
    pub default: Option<Value>,
}

impl Param {
    pub fn required<T: ?Sized>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: std::any::type_name::<T>(),
            default: None,
        }
    }

    pub fn optional<T: ?Sized>(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            type_name: std::any::type_name::<T>(),
            default: Some(default.into()),
        }
    }
}

/// What a tool declares about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub doc: String,
    pub params: Vec<Param>,
}

impl Signature {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: doc.into(),
            params: vec![],
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// How to treat a parameter that has no entry in the docstring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocPolicy {
    /// Use a generic `Parameter: <name>` description.
    #[default]
    Permissive,
    /// Fail schema generation.
    Strict,
}

impl DocPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "permissive" => Some(DocPolicy::Permissive),
            "strict" => Some(DocPolicy::Strict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaOptions {
    pub doc_policy: DocPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSchema>,
}

impl ToolDescriptor {
    pub fn required(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                json!({
                    "type": p.param_type.as_str(),
                    "description": p.description,
                }),
            );
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required(),
        })
    }

    /// The `tools` entry the Messages API expects.
    pub fn to_tool_param(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema(),
        })
    }
}

pub fn generate_descriptor(
    signature: &Signature,
    options: &SchemaOptions,
) -> Result<ToolDescriptor, SchemaError> {
    let tool = signature.name.clone();
    if tool.trim().is_empty() {
        return Err(SchemaError::InvalidSignature {
            tool,
            reason: "name is empty".into(),
        });
    }

    let mut seen = HashSet::new();
    for p in &signature.params {
        if !seen.insert(p.name.as_str()) {
            return Err(SchemaError::InvalidSignature {
                tool,
                reason: format!("parameter `{}` declared twice", p.name),
            });
        }
    }

    let doc = Docstring::parse(&signature.doc);
    if doc.description.is_empty() {
        return Err(SchemaError::MissingDescription { tool });
    }

    let mut parameters = Vec::with_capacity(signature.params.len());
    for p in &signature.params {
        let param_type =
            ParamType::from_type_name(p.type_name).ok_or_else(|| SchemaError::UnsupportedType {
                tool: tool.clone(),
                param: p.name.clone(),
                type_name: p.type_name.to_string(),
            })?;

        let documented = doc
            .param(&p.name)
            .map(|d| d.description.clone())
            .filter(|d| !d.is_empty());
        let description = match (documented, options.doc_policy) {
            (Some(d), _) => d,
            (None, DocPolicy::Permissive) => format!("Parameter: {}", p.name),
            (None, DocPolicy::Strict) => {
                return Err(SchemaError::MissingParamDoc {
                    tool,
                    param: p.name.clone(),
                })
            }
        };

        parameters.push(ParamSchema {
            name: p.name.clone(),
            param_type,
            description,
            required: p.default.is_none(),
        });
    }

    Ok(ToolDescriptor {
        name: tool,
        description: doc.description,
        parameters,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocParam {
    pub name: String,
    pub type_name: Option<String>,
    pub description: String,
}

/// A parsed Google-style docstring.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Docstring {
    pub description: String,
    pub params: Vec<DocParam>,
}

const SECTION_HEADERS: &[&str] = &[
    "Args", "Arguments", "Parameters", "Params", "Returns", "Return", "Raises", "Yields",
    "Example", "Examples", "Note", "Notes", "Attributes",
];
const PARAM_SECTIONS: &[&str] = &["Args", "Arguments", "Parameters", "Params"];

fn param_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\*{0,2}([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:\s*(.*)$")
            .expect("param line pattern is valid")
    })
}

impl Docstring {
    pub fn parse(doc: &str) -> Self {
        let lines = clean_doc(doc);
        let mut description = Vec::new();
        let mut params: Vec<DocParam> = Vec::new();
        let mut section: Option<&str> = None;
        let mut entry_indent: Option<usize> = None;

        for line in &lines {
            let indent = line.chars().take_while(|c| c.is_whitespace()).count();
            let trimmed = line.trim();

            if indent == 0 {
                if let Some(header) = section_header(trimmed) {
                    section = Some(header);
                    entry_indent = None;
                    continue;
                }
            }

            match section {
                None => description.push(line.as_str()),
                Some(s) if PARAM_SECTIONS.contains(&s) => {
                    if trimmed.is_empty() {
                        continue;
                    }
                    if indent == 0 {
                        // unindented text closes the section
                        section = Some("");
                        continue;
                    }
                    let base = *entry_indent.get_or_insert(indent);
                    if indent <= base {
                        if let Some(caps) = param_line().captures(trimmed) {
                            params.push(DocParam {
                                name: caps[1].to_string(),
                                type_name: caps.get(2).map(|m| m.as_str().trim().to_string()),
                                description: caps[3].trim().to_string(),
                            });
                        }
                    } else if let Some(last) = params.last_mut() {
                        if last.description.is_empty() {
                            last.description = trimmed.to_string();
                        } else {
                            last.description.push('\n');
                            last.description.push_str(trimmed);
                        }
                    }
                }
                Some(_) => {}
            }
        }

        Docstring {
            description: description.join("\n").trim().to_string(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&DocParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

fn section_header(line: &str) -> Option<&'static str> {
    let name = line.strip_suffix(':')?.trim();
    SECTION_HEADERS.iter().copied().find(|h| *h == name)
}

/// Strips the common indentation (counted in characters) of every line after
/// the first and drops leading and trailing blank lines.
fn clean_doc(doc: &str) -> Vec<String> {
    let raw: Vec<&str> = doc.lines().collect();
    let margin = raw
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let mut lines: Vec<String> = raw
        .iter()
        .enumerate()
        .map(|(i, l)| {
            if i == 0 {
                l.trim_start().to_string()
            } else if l.trim().is_empty() {
                String::new()
            } else {
                l.chars().skip(margin).collect::<String>().trim_end().to_string()
            }
        })
        .collect();

    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOO_DOC: &str = "
        If the user provides a `bar` value, call this function with it and give them back the result.

        Args:
            bar (int): User provided value.
            buzz (str): Unused (default: cat).

        ";

    fn foo() -> Signature {
        Signature::new("foo", FOO_DOC)
            .param(Param::required::<i64>("bar"))
            .param(Param::optional::<String>("buzz", "cat"))
    }

    #[test]
    fn test_generate_schema_for_documented_tool() {
        let descriptor = generate_descriptor(&foo(), &SchemaOptions::default()).unwrap();

        assert_eq!(descriptor.name, "foo");
        assert_eq!(
            descriptor.description,
            "If the user provides a `bar` value, call this function with it and give them back the result."
        );
        assert_eq!(descriptor.required(), vec!["bar"]);
        assert_eq!(
            descriptor.to_tool_param(),
            json!({
                "name": "foo",
                "description": "If the user provides a `bar` value, call this function with it and give them back the result.",
                "input_schema": {
                    "type": "object",
                    "properties": {
                        "bar": {"type": "integer", "description": "User provided value."},
                        "buzz": {"type": "string", "description": "Unused (default: cat)."}
                    },
                    "required": ["bar"]
                }
            })
        );
    }

    #[test]
    fn test_property_order_follows_declaration() {
        let sig = Signature::new("order", "Ordered.")
            .param(Param::required::<bool>("zeta"))
            .param(Param::required::<f64>("alpha"));
        let schema = generate_descriptor(&sig, &SchemaOptions::default())
            .unwrap()
            .input_schema();
        let keys: Vec<_> = schema["properties"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(schema["properties"]["alpha"]["type"], "number");
        assert_eq!(schema["properties"]["zeta"]["type"], "boolean");
    }

    #[test]
    fn test_unsupported_type_fails() {
        let sig = Signature::new("lists", "Takes a list.\n\nArgs:\n    items (list): Things.")
            .param(Param::required::<Vec<String>>("items"));
        let err = generate_descriptor(&sig, &SchemaOptions::default()).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedType { ref param, .. } if param == "items"));
    }

    #[test]
    fn test_missing_description_fails() {
        let sig = Signature::new("nodoc", "\n    Args:\n        url (str): _description_\n")
            .param(Param::required::<&str>("url"));
        let err = generate_descriptor(&sig, &SchemaOptions::default()).unwrap_err();
        assert_eq!(err, SchemaError::MissingDescription { tool: "nodoc".into() });
    }

    #[test]
    fn test_undocumented_param_policy() {
        let sig = Signature::new("half", "Half documented.").param(Param::required::<u32>("count"));

        let permissive = generate_descriptor(&sig, &SchemaOptions::default()).unwrap();
        assert_eq!(permissive.parameters[0].description, "Parameter: count");

        let strict = SchemaOptions { doc_policy: DocPolicy::Strict };
        let err = generate_descriptor(&sig, &strict).unwrap_err();
        assert!(matches!(err, SchemaError::MissingParamDoc { .. }));
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let sig = Signature::new("dup", "Dup.")
            .param(Param::required::<i32>("x"))
            .param(Param::required::<i32>("x"));
        assert!(matches!(
            generate_descriptor(&sig, &SchemaOptions::default()),
            Err(SchemaError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_docstring_multiline_param_and_sections() {
        let doc = Docstring::parse(
            "Summary line.

            More detail here.
                - nested bullet

            Args:
                command (str): The bash command
                    to execute.
                flag: No type given.

            Returns:
                str: ignored
            ",
        );
        assert_eq!(doc.description, "Summary line.\n\nMore detail here.\n    - nested bullet");
        assert_eq!(doc.params.len(), 2);
        assert_eq!(doc.params[0].type_name.as_deref(), Some("str"));
        assert_eq!(doc.params[0].description, "The bash command\nto execute.");
        assert_eq!(doc.params[1].name, "flag");
        assert_eq!(doc.params[1].type_name, None);
    }

    #[test]
    fn test_multibyte_indentation_does_not_panic() {
        let doc = Docstring::parse("Summary.\n Args:\n\u{a0}x (int): value.\n");
        assert_eq!(doc.description, "Summary.");

        let doc = Docstring::parse("Summary.\n    Args:\n    \u{a0}x (int): value.\n");
        assert_eq!(doc.params.len(), 1);
        assert_eq!(doc.params[0].name, "x");
        assert_eq!(doc.params[0].description, "value.");

        let sig = Signature::new("nbsp", "Summary.\n\u{a0}\u{a0}Args:\n\u{a0}\u{a0}\u{a0}x (int): value.\n")
            .param(Param::required::<i64>("x"));
        let descriptor = generate_descriptor(&sig, &SchemaOptions::default()).unwrap();
        assert_eq!(descriptor.description, "Summary.");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(ParamType::from_type_name(std::any::type_name::<String>()), Some(ParamType::String));
        assert_eq!(ParamType::from_type_name(std::any::type_name::<&str>()), Some(ParamType::String));
        assert_eq!(ParamType::from_type_name("usize"), Some(ParamType::Integer));
        assert_eq!(ParamType::from_type_name("core::option::Option<i64>"), None);
    }
}
