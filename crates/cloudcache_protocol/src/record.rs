//! Generic attributed records exchanged with the remote store.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Name of an isolated subdivision of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    /// Creates a partition id from its stable name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the partition name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Unique identifier of a record: its partition plus a name unique within it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Partition the record lives in.
    pub partition: PartitionId,
    /// Record name, unique within the partition.
    pub name: String,
}

impl RecordId {
    /// Creates a record id.
    pub fn new(partition: impl Into<PartitionId>, name: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            name: name.into(),
        }
    }

    /// Creates a record id with a freshly generated name.
    pub fn generate(partition: impl Into<PartitionId>) -> Self {
        Self::new(partition, Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.name)
    }
}

/// A geographic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A binary blob attached to a record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Filename of the locally cached copy.
    pub filename: String,
    /// Blob contents.
    pub data: Vec<u8>,
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A named field value on a `RemoteRecord`.
///
/// Typed lists are what the remote store accepts. `List` is the loosely
/// typed form an entity may hand over; it is only valid when every element
/// is the same scalar kind, in which case it is normalized into a typed list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed integer.
    Int(i64),
    /// Double precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Geographic coordinate.
    Location(Location),
    /// Reference to another record.
    Reference(RecordId),
    /// List of text values.
    TextList(Vec<String>),
    /// List of integers.
    IntList(Vec<i64>),
    /// List of doubles.
    DoubleList(Vec<f64>),
    /// List of booleans.
    BoolList(Vec<bool>),
    /// List of byte strings.
    BytesList(Vec<Vec<u8>>),
    /// List of timestamps.
    TimestampList(Vec<i64>),
    /// List of coordinates.
    LocationList(Vec<Location>),
    /// List of references.
    ReferenceList(Vec<RecordId>),
    /// Binary blob.
    Asset(Asset),
    /// Untyped list, see the type-level docs.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Short name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Int(_) => "int",
            FieldValue::Double(_) => "double",
            FieldValue::Bool(_) => "bool",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Location(_) => "location",
            FieldValue::Reference(_) => "reference",
            FieldValue::TextList(_) => "text_list",
            FieldValue::IntList(_) => "int_list",
            FieldValue::DoubleList(_) => "double_list",
            FieldValue::BoolList(_) => "bool_list",
            FieldValue::BytesList(_) => "bytes_list",
            FieldValue::TimestampList(_) => "timestamp_list",
            FieldValue::LocationList(_) => "location_list",
            FieldValue::ReferenceList(_) => "reference_list",
            FieldValue::Asset(_) => "asset",
            FieldValue::List(_) => "list",
        }
    }

    /// Returns true for single (non-list) primitive values.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldValue::Text(_)
                | FieldValue::Int(_)
                | FieldValue::Double(_)
                | FieldValue::Bool(_)
                | FieldValue::Bytes(_)
                | FieldValue::Timestamp(_)
                | FieldValue::Location(_)
                | FieldValue::Reference(_)
        )
    }

    /// Returns true for an empty list of any kind.
    pub fn is_empty_list(&self) -> bool {
        match self {
            FieldValue::TextList(v) => v.is_empty(),
            FieldValue::IntList(v) => v.is_empty(),
            FieldValue::DoubleList(v) => v.is_empty(),
            FieldValue::BoolList(v) => v.is_empty(),
            FieldValue::BytesList(v) => v.is_empty(),
            FieldValue::TimestampList(v) => v.is_empty(),
            FieldValue::LocationList(v) => v.is_empty(),
            FieldValue::ReferenceList(v) => v.is_empty(),
            FieldValue::List(v) => v.is_empty(),
            _ => false,
        }
    }

    /// Returns the text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the referenced record id, if this is a reference.
    pub fn as_reference(&self) -> Option<&RecordId> {
        match self {
            FieldValue::Reference(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the referenced record ids, if this is a reference list.
    pub fn as_reference_list(&self) -> Option<&[RecordId]> {
        match self {
            FieldValue::ReferenceList(ids) => Some(ids),
            _ => None,
        }
    }

    /// Returns the text list, if this is a text list.
    pub fn as_text_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::TextList(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the asset, if this is an asset value.
    pub fn as_asset(&self) -> Option<&Asset> {
        match self {
            FieldValue::Asset(asset) => Some(asset),
            _ => None,
        }
    }
}

/// Server-side versioning info decoded from `SystemMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFields {
    /// Record type tag.
    pub record_type: String,
    /// Record identifier.
    pub record_id: RecordId,
    /// Server change tag; `None` until the record has been saved.
    pub change_tag: Option<String>,
    /// Server modification time in milliseconds since the epoch.
    pub modified_at: Option<i64>,
}

/// Opaque system-metadata blob needed to build future mutations.
///
/// Internally this is the CBOR encoding of `SystemFields`. Callers treat it as
/// bytes and only the remote store gives it meaning.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemMetadata(Vec<u8>);

impl SystemMetadata {
    /// Builds metadata for a record that has never been saved remotely.
    pub fn fresh(record_type: &str, record_id: RecordId) -> ProtocolResult<Self> {
        Self::from_fields(&SystemFields {
            record_type: record_type.to_string(),
            record_id,
            change_tag: None,
            modified_at: None,
        })
    }

    /// Encodes system fields into an opaque blob.
    pub fn from_fields(fields: &SystemFields) -> ProtocolResult<Self> {
        let mut bytes = Vec::new();
        ciborium::into_writer(fields, &mut bytes)
            .map_err(|e| ProtocolError::MetadataEncoding(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Wraps bytes received from the remote store.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the system fields.
    pub fn fields(&self) -> ProtocolResult<SystemFields> {
        ciborium::from_reader(self.0.as_slice())
            .map_err(|e| ProtocolError::MetadataDecoding(e.to_string()))
    }

    /// Decodes only the record id.
    pub fn record_id(&self) -> ProtocolResult<RecordId> {
        Ok(self.fields()?.record_id)
    }
}

impl fmt::Debug for SystemMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemMetadata({} bytes)", self.0.len())
    }
}

/// A generic attributed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record type tag.
    pub record_type: String,
    /// Record identifier.
    pub id: RecordId,
    /// Named field values.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Opaque system metadata.
    pub metadata: SystemMetadata,
}

impl RemoteRecord {
    /// Creates an empty, never-saved record.
    pub fn new(record_type: impl Into<String>, id: RecordId) -> ProtocolResult<Self> {
        let record_type = record_type.into();
        let metadata = SystemMetadata::fresh(&record_type, id.clone())?;
        Ok(Self {
            record_type,
            id,
            fields: BTreeMap::new(),
            metadata,
        })
    }

    /// Rebuilds an empty record from previously stored system metadata.
    pub fn from_metadata(metadata: SystemMetadata) -> ProtocolResult<Self> {
        let fields = metadata.fields()?;
        Ok(Self {
            record_type: fields.record_type,
            id: fields.record_id,
            fields: BTreeMap::new(),
            metadata,
        })
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a field value, replacing any previous one.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Removes a field value.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Iterates the field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
