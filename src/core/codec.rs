//! Field codec: decode inbound attribute values into stored form and back.
//!
//! The codec is a pure transform. It keeps no state between calls, so one
//! `FieldCodec` value is shared by every request handler.
//!
//! `json` attributes accept any well-formed JSON. Whether a bare scalar is
//! acceptable for a `json` attribute is governed by [`Strictness`]. Values
//! are never coerced: a string `"12"` from a form body stays a string.
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::schema::{Attribute, AttributeType, ContentType, RESERVED_KEYS};
use crate::core::value::FieldValue;
use crate::json::parse;

/// How a value reached the codec.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Already structured, e.g. a member of a parsed JSON body.
    Structured(Value),
    /// JSON text carried inside another transport, e.g. a multipart part.
    Text(String),
}

/// Attribute name to inbound value, before decoding.
pub type InboundDocument = BTreeMap<String, Inbound>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Strictness {
    /// `json` attributes only take objects and arrays.
    #[default]
    Strict,
    /// `json` attributes take any JSON value.
    Lenient,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteMode {
    Create,
    Update,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FieldCodec {
    strictness: Strictness,
}

impl FieldCodec {
    pub fn new(strictness: Strictness) -> Self {
        Self { strictness }
    }

    pub fn strictness(&self) -> Strictness {
        self.strictness
    }

    /// Decodes one attribute value. `null` always decodes to `Null`;
    /// required-ness is checked at the entry level.
    pub fn decode(&self, attribute: &Attribute, inbound: Inbound) -> Result<FieldValue, Error> {
        let value = match inbound {
            Inbound::Structured(value) => value,
            Inbound::Text(text) => parse::from_str::<Value>(&text).map_err(|err| {
                Error::new(ErrorKind::MalformedValue)
                    .with_message("value is not valid JSON")
                    .with_hint(parse::hint_for_error(&err, attribute.kind.label()))
                    .with_source(err)
            })?,
        };
        if value.is_null() {
            return Ok(FieldValue::Null);
        }

        match attribute.kind {
            AttributeType::Json => {
                let field = FieldValue::from(value);
                if !field.is_structured() && self.strictness == Strictness::Strict {
                    return Err(Error::new(ErrorKind::TypeMismatch)
                        .with_message(format!(
                            "json attribute expects an object or array, got {}",
                            field.shape().label()
                        ))
                        .with_hint("Wrap the value in an object, or run the server with --json-strictness lenient."));
                }
                Ok(field)
            }
            kind => {
                if !kind.matches(&value) {
                    return Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                        "expected {} value, got {}",
                        kind.label(),
                        json_type_name(&value)
                    )));
                }
                Ok(FieldValue::from(value))
            }
        }
    }

    /// Runs every declared default through `decode`, so a content type whose
    /// defaults this codec would reject is refused before any write.
    pub fn check_defaults(&self, content_type: &ContentType) -> Result<(), Error> {
        for (name, attribute) in &content_type.attributes {
            if let Some(default) = &attribute.default {
                self.decode(attribute, Inbound::Structured(default.clone()))
                    .map_err(|err| {
                        err.with_collection(&content_type.name)
                            .with_field(name)
                            .with_hint("Declared defaults must be accepted under the configured json strictness.")
                    })?;
            }
        }
        Ok(())
    }

    /// Encodes a stored value for a response body. Shape is preserved.
    pub fn encode(&self, value: &FieldValue) -> Value {
        value.as_value()
    }

    /// Parses the text of a multipart `data` part into an entry document.
    pub fn decode_document(&self, text: &str) -> Result<Map<String, Value>, Error> {
        let value = parse::from_str::<Value>(text).map_err(|err| {
            Error::new(ErrorKind::MalformedValue)
                .with_message("entry document is not valid JSON")
                .with_hint(parse::hint_for_error(&err, "data"))
                .with_source(err)
        })?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "entry document must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Decodes every attribute of an inbound document against a content type.
    ///
    /// On `Create`, absent attributes take their declared default, and
    /// required attributes must end up non-null. On `Update`, only the
    /// attributes present in `document` are returned.
    pub fn decode_entry(
        &self,
        content_type: &ContentType,
        document: InboundDocument,
        mode: WriteMode,
    ) -> Result<Map<String, Value>, Error> {
        let mut decoded = Map::new();
        for (name, inbound) in document {
            if RESERVED_KEYS.contains(&name.as_str()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("{name} is managed by the store and cannot be written"))
                    .with_collection(&content_type.name)
                    .with_field(name));
            }
            let Some(attribute) = content_type.attribute(&name) else {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("unknown attribute")
                    .with_collection(&content_type.name)
                    .with_field(name));
            };
            let value = self
                .decode(attribute, inbound)
                .map_err(|err| err.with_collection(&content_type.name).with_field(&name))?;
            if attribute.required && value == FieldValue::Null {
                return Err(required_error(content_type, &name));
            }
            decoded.insert(name, self.encode(&value));
        }

        if mode == WriteMode::Create {
            for (name, attribute) in &content_type.attributes {
                if decoded.contains_key(name) {
                    continue;
                }
                if let Some(default) = &attribute.default {
                    let value = self
                        .decode(attribute, Inbound::Structured(default.clone()))
                        .map_err(|err| err.with_collection(&content_type.name).with_field(name))?;
                    decoded.insert(name.clone(), self.encode(&value));
                } else if attribute.required {
                    return Err(required_error(content_type, name));
                }
            }
        }
        Ok(decoded)
    }
}

/// Wraps every member of a parsed JSON body as structured input.
pub fn structured_document(map: Map<String, Value>) -> InboundDocument {
    map.into_iter()
        .map(|(name, value)| (name, Inbound::Structured(value)))
        .collect()
}

fn required_error(content_type: &ContentType, name: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("required attribute is missing")
        .with_collection(&content_type.name)
        .with_field(name)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
