pub mod codec;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate field `{0}`")]
    DuplicateField(String),
    #[error("schema must declare exactly one primary key field")]
    NoPrimaryKey,
    #[error("schema declares more than one primary key field")]
    MultiplePrimaryKeys,
    #[error("primary key field `{0}` must be a varchar")]
    PrimaryKeyType(String),
    #[error("auto_id is only valid on the primary key field")]
    AutoIdOnNonPrimary,
    #[error("vector field `{0}` must have a non-zero dimension")]
    ZeroDimension(String),
    #[error("row has {got} values, schema expects {expected}")]
    FieldCount { expected: usize, got: usize },
    #[error("value for field `{0}` does not match its declared type")]
    TypeMismatch(String),
    #[error("vector for field `{field}` has {got} elements, expected {expected}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        got: usize,
    },
    #[error("value for field `{field}` exceeds max_length {max}")]
    ValueTooLong { field: String, max: usize },
    #[error("corrupt field encoding")]
    CorruptEncoding,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FieldType {
    VarChar { max_length: usize },
    Double,
    FloatVector { dim: usize },
}

impl FieldType {
    pub fn is_vector(&self) -> bool {
        matches!(self, FieldType::FloatVector { .. })
    }

    pub fn dim(&self) -> Option<usize> {
        match self {
            FieldType::FloatVector { dim } => Some(*dim),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub auto_id: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_primary: false,
            auto_id: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_auto_id(mut self) -> Self {
        self.auto_id = true;
        self
    }
}

/// Validated, ordered field list. Field order is fixed at creation and row
/// values are positional against it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionSchema {
    fields: Vec<FieldSchema>,
    primary_idx: usize,
    #[serde(default)]
    description: String,
}

impl CollectionSchema {
    pub fn new(
        fields: Vec<FieldSchema>,
        description: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.clone()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if field.auto_id && !field.is_primary {
                return Err(SchemaError::AutoIdOnNonPrimary);
            }
            if let FieldType::FloatVector { dim } = field.field_type {
                if dim == 0 {
                    return Err(SchemaError::ZeroDimension(field.name.clone()));
                }
            }
        }
        let primaries: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_primary)
            .map(|(i, _)| i)
            .collect();
        let primary_idx = match primaries.as_slice() {
            [] => return Err(SchemaError::NoPrimaryKey),
            [idx] => *idx,
            _ => return Err(SchemaError::MultiplePrimaryKeys),
        };
        if !matches!(fields[primary_idx].field_type, FieldType::VarChar { .. }) {
            return Err(SchemaError::PrimaryKeyType(
                fields[primary_idx].name.clone(),
            ));
        }
        Ok(Self {
            fields,
            primary_idx,
            description: description.into(),
        })
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn primary_idx(&self) -> usize {
        self.primary_idx
    }

    pub fn primary_field(&self) -> &FieldSchema {
        &self.fields[self.primary_idx]
    }

    pub fn auto_id(&self) -> bool {
        self.primary_field().auto_id
    }

    pub fn field(&self, name: &str) -> Option<(usize, &FieldSchema)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }

    /// Checks a full positional row against the schema. Callers inserting
    /// into an `auto_id` collection omit the primary key and the segment
    /// store fills it in before validation.
    pub fn validate_row(&self, row: &[Value]) -> Result<(), SchemaError> {
        if row.len() != self.fields.len() {
            return Err(SchemaError::FieldCount {
                expected: self.fields.len(),
                got: row.len(),
            });
        }
        for (field, value) in self.fields.iter().zip(row.iter()) {
            match (&field.field_type, value) {
                (FieldType::VarChar { max_length }, Value::Str(s)) => {
                    if s.len() > *max_length {
                        return Err(SchemaError::ValueTooLong {
                            field: field.name.clone(),
                            max: *max_length,
                        });
                    }
                }
                (FieldType::Double, Value::Double(_)) => {}
                (FieldType::FloatVector { dim }, Value::Vector(v)) => {
                    if v.len() != *dim {
                        return Err(SchemaError::DimensionMismatch {
                            field: field.name.clone(),
                            expected: *dim,
                            got: v.len(),
                        });
                    }
                }
                _ => return Err(SchemaError::TypeMismatch(field.name.clone())),
            }
        }
        Ok(())
    }
}

/// Runtime field value. The tagged variant replaces the original system's
/// dynamic dictionary rows; type agreement is checked once per insert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Str(String),
    Double(f64),
    Vector(Vec<f32>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_fields() -> Vec<FieldSchema> {
        vec![
            FieldSchema::new("pk", FieldType::VarChar { max_length: 100 }).primary(),
            FieldSchema::new("random", FieldType::Double),
            FieldSchema::new("embeddings", FieldType::FloatVector { dim: 8 }),
        ]
    }

    #[test]
    fn accepts_single_primary_key() {
        let schema = CollectionSchema::new(demo_fields(), "demo").unwrap();
        assert_eq!(schema.primary_field().name, "pk");
        assert_eq!(schema.fields().len(), 3);
    }

    #[test]
    fn rejects_missing_primary_key() {
        let fields = vec![FieldSchema::new("random", FieldType::Double)];
        assert!(matches!(
            CollectionSchema::new(fields, ""),
            Err(SchemaError::NoPrimaryKey)
        ));
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let mut fields = demo_fields();
        fields.push(FieldSchema::new("random", FieldType::Double));
        assert!(matches!(
            CollectionSchema::new(fields, ""),
            Err(SchemaError::DuplicateField(name)) if name == "random"
        ));
    }

    #[test]
    fn rejects_non_varchar_primary() {
        let fields = vec![FieldSchema::new("pk", FieldType::Double).primary()];
        assert!(matches!(
            CollectionSchema::new(fields, ""),
            Err(SchemaError::PrimaryKeyType(_))
        ));
    }

    #[test]
    fn validate_row_flags_dimension_mismatch() {
        let schema = CollectionSchema::new(demo_fields(), "").unwrap();
        let row = vec![
            Value::Str("0".into()),
            Value::Double(0.5),
            Value::Vector(vec![0.0; 7]),
        ];
        assert!(matches!(
            schema.validate_row(&row),
            Err(SchemaError::DimensionMismatch { expected: 8, got: 7, .. })
        ));
    }

    #[test]
    fn validate_row_flags_type_mismatch() {
        let schema = CollectionSchema::new(demo_fields(), "").unwrap();
        let row = vec![
            Value::Str("0".into()),
            Value::Str("not a double".into()),
            Value::Vector(vec![0.0; 8]),
        ];
        assert!(matches!(
            schema.validate_row(&row),
            Err(SchemaError::TypeMismatch(name)) if name == "random"
        ));
    }
}
