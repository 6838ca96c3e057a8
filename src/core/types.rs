use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;
use crate::core::error::{Error, ErrorKind, Result};

/// Externally visible 128-bit document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        DocumentId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(DocumentId)
            .map_err(|e| Error::invalid_input(format!("invalid document id '{}': {}", s, e)))
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persister-assigned identifier, stable offset into the dictionary log.
pub type InternalId = u64;

/// The closed set of storable value kinds, tagged as on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Integer,
    Vector,
    Matrix,
    Bytes,
}

impl ValueKind {
    pub fn tag(&self) -> i32 {
        match self {
            ValueKind::Text => 1,
            ValueKind::Integer => 2,
            ValueKind::Vector => 3,
            ValueKind::Matrix => 4,
            ValueKind::Bytes => 5,
        }
    }

    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            1 => Ok(ValueKind::Text),
            2 => Ok(ValueKind::Integer),
            3 => Ok(ValueKind::Vector),
            4 => Ok(ValueKind::Matrix),
            5 => Ok(ValueKind::Bytes),
            other => Err(Error::corruption(format!("unknown value type tag {}", other))),
        }
    }

    /// Directory name of the per-type KVStore under a field folder.
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueKind::Text => "String",
            ValueKind::Integer => "Integer",
            ValueKind::Vector => "FloatArray",
            ValueKind::Matrix => "FloatMatrix",
            ValueKind::Bytes => "Bytes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i32),
    Vector(Vec<f32>),
    Matrix(Vec<Vec<f32>>),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Integer(_) => ValueKind::Integer,
            FieldValue::Vector(_) => ValueKind::Vector,
            FieldValue::Matrix(_) => ValueKind::Matrix,
            FieldValue::Bytes(_) => ValueKind::Bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            FieldValue::Vector(v) => Some(v),
            _ => None,
        }
    }
}

/// Field-name to field-type mapping; serialized into the dictionary so a
/// document can be reassembled from the per-field stores.
pub type DocumentShape = BTreeMap<String, ValueKind>;

pub fn serialize_shape(shape: &DocumentShape) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(shape)?)
}

pub fn deserialize_shape(bytes: &[u8]) -> Result<DocumentShape> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Immutable schemaless document: an id plus an unordered field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: HashMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: DocumentId) -> Self {
        Document {
            id,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn add_field(&mut self, name: String, value: FieldValue) {
        self.fields.insert(name, value);
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn shape(&self) -> DocumentShape {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.kind()))
            .collect()
    }

    /// Matrices must be rectangular before anything touches the stores.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in &self.fields {
            if let FieldValue::Matrix(rows) = value {
                let width = rows.first().map(|r| r.len()).unwrap_or(0);
                if rows.iter().any(|r| r.len() != width) {
                    return Err(Error::new(
                        ErrorKind::InvalidInput,
                        format!("field '{}' holds a non-rectangular matrix", name),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_round_trip() {
        let doc = Document::new(DocumentId::new())
            .with_field("title", FieldValue::Text("axon".into()))
            .with_field("year", FieldValue::Integer(2024))
            .with_field("embedding", FieldValue::Vector(vec![1.0, 0.0]));

        let shape = doc.shape();
        let bytes = serialize_shape(&shape).unwrap();
        let back = deserialize_shape(&bytes).unwrap();
        assert_eq!(shape, back);
        assert_eq!(back["embedding"], ValueKind::Vector);
    }

    #[test]
    fn ragged_matrix_rejected() {
        let doc = Document::new(DocumentId::new()).with_field(
            "m",
            FieldValue::Matrix(vec![vec![1.0, 2.0], vec![3.0]]),
        );
        let err = doc.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn document_id_parse_round_trip() {
        let id = DocumentId::new();
        assert_eq!(DocumentId::parse(&id.to_string()).unwrap(), id);
        assert!(DocumentId::parse("not-a-uuid").is_err());
    }
}
