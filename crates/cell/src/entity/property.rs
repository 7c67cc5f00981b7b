use std::collections::{BTreeMap, BTreeSet};

use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::error::CodecError;
use crate::types::PropertyId;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Vector3([f32; 3]),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// Encodes a sequence of values into the argument/value stream format.
pub fn encode_values(values: &[PropertyValue]) -> Result<Vec<u8>, CodecError> {
    rkyv::to_bytes::<rancor::Error>(&values.to_vec())
        .map(|aligned| aligned.into_vec())
        .map_err(CodecError::Serialize)
}

pub fn decode_values(data: &[u8]) -> Result<Vec<PropertyValue>, CodecError> {
    rkyv::from_bytes::<Vec<PropertyValue>, rancor::Error>(data).map_err(CodecError::Deserialize)
}

pub fn encode_value(value: &PropertyValue) -> Result<Vec<u8>, CodecError> {
    rkyv::to_bytes::<rancor::Error>(value)
        .map(|aligned| aligned.into_vec())
        .map_err(CodecError::Serialize)
}

pub fn decode_value(data: &[u8]) -> Result<PropertyValue, CodecError> {
    rkyv::from_bytes::<PropertyValue, rancor::Error>(data).map_err(CodecError::Deserialize)
}

/// Property values of one entity plus the ids written during the current tick.
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    values: BTreeMap<PropertyId, PropertyValue>,
    changed: BTreeSet<PropertyId>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = (PropertyId, PropertyValue)>) -> Self {
        Self {
            values: values.into_iter().collect(),
            changed: BTreeSet::new(),
        }
    }

    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.values.get(&id)
    }

    /// Returns true when the stored value actually changed.
    pub fn set(&mut self, id: PropertyId, value: PropertyValue) -> bool {
        if self.values.get(&id) == Some(&value) {
            return false;
        }
        self.values.insert(id, value);
        self.changed.insert(id);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> {
        self.values.iter().map(|(id, v)| (*id, v))
    }

    pub fn changed(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> {
        self.changed
            .iter()
            .filter_map(|id| self.values.get(id).map(|v| (*id, v)))
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changed.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_vec(&self) -> Vec<(PropertyId, PropertyValue)> {
        self.values.iter().map(|(id, v)| (*id, v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_tracks_only_real_changes() {
        let mut table = PropertyTable::new();
        assert!(table.set(1, PropertyValue::Int(5)));
        assert!(!table.set(1, PropertyValue::Int(5)));
        assert_eq!(table.changed().count(), 1);

        table.clear_changes();
        assert!(!table.has_changes());
        assert!(table.set(1, PropertyValue::Int(6)));
        assert_eq!(table.get(1), Some(&PropertyValue::Int(6)));
    }

    #[test]
    fn value_stream_decodes_what_was_encoded() {
        let args = vec![
            PropertyValue::Str("hello".into()),
            PropertyValue::Vector3([1.0, 2.0, 3.0]),
        ];
        let bytes = encode_values(&args).unwrap();
        assert_eq!(decode_values(&bytes).unwrap(), args);

        let single = encode_value(&PropertyValue::Bool(true)).unwrap();
        assert_eq!(decode_value(&single).unwrap(), PropertyValue::Bool(true));
        assert!(decode_values(&[1, 2, 3]).is_err());
    }
}
