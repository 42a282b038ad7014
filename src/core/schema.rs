// Content type declarations: attribute names, types, and registry loading.
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::json::parse;

/// Keys the store owns; attributes may not shadow them.
pub const RESERVED_KEYS: [&str; 3] = ["id", "created_at", "updated_at"];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Json,
    String,
    Text,
    Integer,
    Float,
    Boolean,
}

impl AttributeType {
    pub fn label(self) -> &'static str {
        match self {
            AttributeType::Json => "json",
            AttributeType::String => "string",
            AttributeType::Text => "text",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::Boolean => "boolean",
        }
    }

    /// JSON-type check for scalar attributes. `json` accepts anything here;
    /// its shape policy lives in the codec.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            AttributeType::Json => true,
            AttributeType::String | AttributeType::Text => value.is_string(),
            AttributeType::Integer => value.is_i64() || value.is_u64(),
            AttributeType::Float => value.is_number(),
            AttributeType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Attribute {
    pub fn new(kind: AttributeType) -> Self {
        Self {
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentType {
    pub name: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl ContentType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn validate(&self) -> Result<(), Error> {
        ensure_collection_name(&self.name)?;
        for (name, attribute) in &self.attributes {
            if name.is_empty() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("attribute name must not be empty")
                    .with_collection(&self.name));
            }
            if RESERVED_KEYS.contains(&name.as_str()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("attribute name is reserved")
                    .with_collection(&self.name)
                    .with_field(name)
                    .with_hint("Rename the attribute; id, created_at and updated_at are managed by the store."));
            }
            if let Some(default) = &attribute.default {
                if default.is_null() || !attribute.kind.matches(default) {
                    return Err(Error::new(ErrorKind::TypeMismatch)
                        .with_message(format!(
                            "default does not match attribute type {}",
                            attribute.kind.label()
                        ))
                        .with_collection(&self.name)
                        .with_field(name));
                }
            }
        }
        Ok(())
    }
}

/// Set of declared content types, keyed by collection name.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: BTreeMap<String, ContentType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, content_type: ContentType) -> Result<(), Error> {
        content_type.validate()?;
        if self.types.contains_key(&content_type.name) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("content type declared more than once")
                .with_collection(&content_type.name));
        }
        self.types.insert(content_type.name.clone(), content_type);
        Ok(())
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Result<Self, Error> {
        self.register(content_type)?;
        Ok(self)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), Error> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            let kind = if err.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message(format!("failed to read schema file {}", path.display()))
                .with_source(err)
        })?;
        for content_type in parse_schema_text(&text)? {
            self.register(content_type).map_err(|err| {
                let hint = format!("declared in {}", path.display());
                err.with_hint(hint)
            })?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ContentType> {
        self.types.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&ContentType, Error> {
        self.get(name).ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("unknown collection")
                .with_collection(name)
        })
    }

    pub fn content_types(&self) -> impl Iterator<Item = &ContentType> {
        self.types.values()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaDocument {
    Many(Vec<ContentType>),
    One(ContentType),
}

pub fn parse_schema_text(text: &str) -> Result<Vec<ContentType>, Error> {
    let document: SchemaDocument = parse::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid schema document")
            .with_hint(parse::hint_for_error(&err, "schema"))
            .with_source(err)
    })?;
    Ok(match document {
        SchemaDocument::Many(types) => types,
        SchemaDocument::One(content_type) => vec![content_type],
    })
}

pub fn ensure_collection_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("collection name must not be empty"));
    }
    if name.contains('/') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("collection name must not contain path separators")
            .with_collection(name));
    }
    if name.starts_with('.') {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("collection name must not start with a dot")
            .with_collection(name));
    }
    Ok(())
}
