//! In-memory model of one compiled catalog
//!
//! A catalog is a flat map of resources keyed by `Type[Title]`. Resources
//! reference each other by those key strings, so no graph structure is kept
//! here. Catalogs are parsed from the compiler's serialized output, which is
//! JSON with occasional latin-1 bytes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::{CoreError, Result};

/// Builtin types that never count as core resources.
const TRIVIAL_BUILTIN_TYPES: &[&str] = &["Notify", "Class", "Stage"];

/// Tag line prefixed to binary content so that a type change between text
/// and binary shows up as a content change.
pub const BINARY_CONTENT_TAG: &str = "Puppet::Pops::Types::PBinaryType::Binary";

/// Content of a resource, extracted from its `content` parameter.
///
/// The compiler serializes binary content as
/// `{"__pcore_type__": "Binary", "__pcore_value__": "<base64>"}`; everything
/// else is kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(String),
}

impl Content {
    fn from_value(value: &Value) -> Self {
        if let Value::Object(map) = value
            && map.get("__pcore_type__").and_then(Value::as_str) == Some("Binary")
        {
            let encoded = map
                .get("__pcore_value__")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Content::Binary(encoded.to_string());
        }
        match value {
            Value::String(text) => Content::Text(text.clone()),
            other => Content::Text(other.to_string()),
        }
    }

    /// Render the content for line-based diffing.
    pub fn diffable_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Binary(encoded) => format!("{BINARY_CONTENT_TAG}\n{encoded}"),
        }
    }
}

/// A single resource of a catalog.
#[derive(Debug, Clone)]
pub struct Resource {
    pub resource_type: String,
    pub title: String,
    pub exported: bool,
    /// All parameters except `content` and `source`.
    pub parameters: HashMap<String, Value>,
    pub content: Option<Content>,
    /// External content source, kept separate so equality can compare it.
    pub source: Option<Value>,
}

impl Resource {
    /// Parse one resource out of the compiler's resource array.
    pub fn from_json(data: &Value) -> Result<Self> {
        let resource_type = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidResource {
                message: "missing 'type' field".to_string(),
            })?
            .to_string();
        let title = data
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidResource {
                message: format!("resource of type {resource_type} is missing 'title'"),
            })?
            .to_string();
        let exported = data
            .get("exported")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut parameters = HashMap::new();
        let mut content = None;
        let mut source = None;
        if let Some(Value::Object(params)) = data.get("parameters") {
            for (name, value) in params {
                match name.as_str() {
                    "content" => content = Some(Content::from_value(value)),
                    "source" => source = Some(value.clone()),
                    _ => {
                        parameters.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        Ok(Self {
            resource_type,
            title,
            exported,
            parameters,
            content,
            source,
        })
    }

    /// The `Type[Title]` key identifying this resource within a catalog.
    pub fn key(&self) -> String {
        format!("{}[{}]", self.resource_type, self.title)
    }

    /// A core resource is a non-scoped builtin outside the trivial whitelist.
    pub fn is_core(&self) -> bool {
        !self.resource_type.contains("::")
            && !TRIVIAL_BUILTIN_TYPES.contains(&self.resource_type.as_str())
    }

    /// Shell resource standing in for a side where the key is missing:
    /// carries only type, title and the exported flag.
    pub fn shell(&self) -> Resource {
        Resource {
            resource_type: self.resource_type.clone(),
            title: self.title.clone(),
            exported: self.exported,
            parameters: HashMap::new(),
            content: None,
            source: None,
        }
    }

    /// True when two resources with the same key have the same definition.
    pub fn same_definition(&self, other: &Resource) -> bool {
        self.content == other.content
            && self.source == other.source
            && self.parameters == other.parameters
    }
}

/// One compiled catalog: a host name plus its resources keyed by `Type[Title]`.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub name: String,
    pub resources: HashMap<String, Resource>,
}

impl Catalog {
    /// Parse a catalog from the raw bytes of the compiler's output file.
    ///
    /// The compiler is not strict about encodings; bytes that are not valid
    /// UTF-8 are decoded as latin-1.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let text = decode_latin1_tolerant(bytes);
        let value: Value = serde_json::from_str(&text)?;
        Self::from_value(&value)
    }

    /// Read and parse a catalog file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Build a catalog from parsed JSON. Accepts both the legacy layout that
    /// wraps everything in a `data` object and the flat modern layout.
    pub fn from_value(value: &Value) -> Result<Self> {
        let base = value.get("data").unwrap_or(value);
        let name = base
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidCatalog {
                message: "missing 'name' field".to_string(),
            })?
            .to_string();
        let raw_resources = base
            .get("resources")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::InvalidCatalog {
                message: format!("catalog for {name} has no 'resources' array"),
            })?;

        let mut resources = HashMap::with_capacity(raw_resources.len());
        for raw in raw_resources {
            let resource = Resource::from_json(raw)?;
            let key = resource.key();
            // Last write wins, as the compiler's own serialization does.
            if resources.insert(key.clone(), resource).is_some() {
                warn!(catalog = %name, resource = %key, "duplicate resource key, keeping the later definition");
            }
        }

        Ok(Self { name, resources })
    }

    /// Keys of all resources, optionally restricted to core resources.
    pub fn keys(&self, core_only: bool) -> BTreeSet<&str> {
        self.resources
            .iter()
            .filter(|(_, resource)| !core_only || resource.is_core())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

fn decode_latin1_tolerant(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog_value() -> Value {
        json!({
            "name": "test.example.org",
            "resources": [
                {"type": "File", "title": "/etc/motd", "exported": false,
                 "parameters": {"content": "hello\n", "mode": "0444"}},
                {"type": "Class", "title": "Base", "exported": false},
                {"type": "Sshkey", "title": "host", "exported": true,
                 "parameters": {"type": "rsa"}},
            ]
        })
    }

    #[test]
    fn parse_flat_catalog() {
        let catalog = Catalog::from_value(&catalog_value()).unwrap();
        assert_eq!(catalog.name, "test.example.org");
        assert_eq!(catalog.resources.len(), 3);
        let file = &catalog.resources["File[/etc/motd]"];
        assert_eq!(file.content, Some(Content::Text("hello\n".to_string())));
        assert_eq!(file.parameters["mode"], json!("0444"));
        assert!(!file.parameters.contains_key("content"));
    }

    #[test]
    fn parse_legacy_data_wrapper() {
        let wrapped = json!({"data": catalog_value()});
        let catalog = Catalog::from_value(&wrapped).unwrap();
        assert_eq!(catalog.name, "test.example.org");
        assert_eq!(catalog.resources.len(), 3);
    }

    #[test]
    fn parse_latin1_bytes() {
        let mut bytes = br#"{"name": "h1", "resources": [{"type": "Notify", "title": "caf"#.to_vec();
        bytes.push(0xe9); // latin-1 e-acute, invalid as UTF-8
        bytes.extend_from_slice(br#"", "exported": false}]}"#);
        let catalog = Catalog::from_slice(&bytes).unwrap();
        assert!(catalog.resources.contains_key("Notify[café]"));
    }

    #[test]
    fn duplicate_key_last_write_wins() {
        let value = json!({
            "name": "h1",
            "resources": [
                {"type": "File", "title": "/a", "exported": false,
                 "parameters": {"mode": "0644"}},
                {"type": "File", "title": "/a", "exported": false,
                 "parameters": {"mode": "0400"}},
            ]
        });
        let catalog = Catalog::from_value(&value).unwrap();
        assert_eq!(catalog.resources.len(), 1);
        assert_eq!(catalog.resources["File[/a]"].parameters["mode"], json!("0400"));
    }

    #[test]
    fn binary_content_is_tagged() {
        let value = json!({
            "name": "h1",
            "resources": [
                {"type": "File", "title": "/b", "exported": false,
                 "parameters": {"content": {"__pcore_type__": "Binary",
                                            "__pcore_value__": "AAEC"}}},
            ]
        });
        let catalog = Catalog::from_value(&value).unwrap();
        let content = catalog.resources["File[/b]"].content.clone().unwrap();
        assert_eq!(content, Content::Binary("AAEC".to_string()));
        assert!(content.diffable_text().starts_with(BINARY_CONTENT_TAG));
    }

    #[test]
    fn core_resource_predicate() {
        let core = Resource {
            resource_type: "Package".to_string(),
            title: "vim".to_string(),
            exported: false,
            parameters: HashMap::new(),
            content: None,
            source: None,
        };
        assert!(core.is_core());

        let scoped = Resource {
            resource_type: "Systemd::Unit".to_string(),
            ..core.clone()
        };
        assert!(!scoped.is_core());

        for trivial in ["Notify", "Class", "Stage"] {
            let resource = Resource {
                resource_type: trivial.to_string(),
                ..core.clone()
            };
            assert!(!resource.is_core(), "{trivial} must not be core");
        }
    }

    #[test]
    fn missing_name_is_an_error() {
        let err = Catalog::from_value(&json!({"resources": []})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCatalog { .. }));
    }

    #[test]
    fn core_keys_filtered() {
        let catalog = Catalog::from_value(&catalog_value()).unwrap();
        let all = catalog.keys(false);
        let core = catalog.keys(true);
        assert_eq!(all.len(), 3);
        assert_eq!(
            core.into_iter().collect::<Vec<_>>(),
            vec!["File[/etc/motd]", "Sshkey[host]"]
        );
    }
}
