// Structured field values: a classified view over `serde_json::Value`.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shape class of a stored value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shape {
    Mapping,
    Sequence,
    Scalar,
    Null,
}

impl Shape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Shape::Mapping,
            Value::Array(_) => Shape::Sequence,
            Value::Null => Shape::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Shape::Scalar,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Shape::Mapping => "object",
            Shape::Sequence => "array",
            Shape::Scalar => "scalar",
            Shape::Null => "null",
        }
    }
}

/// Arbitrary structured data held by a `json` attribute.
///
/// Serializes transparently as the underlying JSON, so a mapping stays a
/// mapping and a sequence keeps its element order on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FieldValue {
    Mapping(Map<String, Value>),
    Sequence(Vec<Value>),
    Scalar(Value),
    Null,
}

impl FieldValue {
    pub fn shape(&self) -> Shape {
        match self {
            FieldValue::Mapping(_) => Shape::Mapping,
            FieldValue::Sequence(_) => Shape::Sequence,
            FieldValue::Scalar(_) => Shape::Scalar,
            FieldValue::Null => Shape::Null,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, FieldValue::Mapping(_) | FieldValue::Sequence(_))
    }

    pub fn as_value(&self) -> Value {
        self.clone().into()
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => FieldValue::Mapping(map),
            Value::Array(items) => FieldValue::Sequence(items),
            Value::Null => FieldValue::Null,
            scalar => FieldValue::Scalar(scalar),
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Mapping(map) => Value::Object(map),
            FieldValue::Sequence(items) => Value::Array(items),
            FieldValue::Scalar(scalar) => scalar,
            FieldValue::Null => Value::Null,
        }
    }
}
