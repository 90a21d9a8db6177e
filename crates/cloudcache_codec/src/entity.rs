//! Capability traits and static field descriptor tables for local entities.
//!
//! An entity type describes its record shape once, as a `const` table of
//! `FieldDescriptor`s. The codec walks the table instead of inspecting the
//! type at runtime.

use crate::codec::RecordCodec;
use crate::error::{CodecError, CodecResult};
use cloudcache_protocol::{FieldValue, PartitionId, RecordId, RemoteRecord, SystemMetadata};
use std::collections::HashMap;

/// Suffix of a field shadowing a single relationship.
pub const REFERENCE_ID_SUFFIX: &str = "_refid";

/// Suffix of a field shadowing a list relationship.
pub const REFERENCE_IDS_SUFFIX: &str = "_refids";

/// Field name reserved for the system metadata slot.
pub const METADATA_FIELD: &str = "metadata";

/// Access to an entity's system metadata and saved-remotely flag.
pub trait HasMetadata {
    /// Returns the system metadata, if the entity has any.
    fn metadata(&self) -> Option<&SystemMetadata>;

    /// Replaces the system metadata.
    fn set_metadata(&mut self, metadata: Option<SystemMetadata>);

    /// Returns true once the entity has been saved to or received from the remote store.
    fn is_saved_remotely(&self) -> bool;

    /// Marks whether the entity exists remotely.
    fn set_saved_remotely(&mut self, saved: bool);
}

/// Access to an entity's locally cached blob.
pub trait HasAssetField {
    /// Filename of the local blob, if one is attached.
    fn asset_filename(&self) -> Option<&str>;

    /// Attaches or detaches the local blob.
    fn set_asset_filename(&mut self, filename: Option<String>);
}

/// A local type that maps onto one remote record type.
pub trait Entity: HasMetadata + Default + 'static {
    /// Remote record type tag.
    const RECORD_TYPE: &'static str;

    /// Partition new records of this type are created in.
    const PARTITION: &'static str;

    /// Field descriptor table.
    const FIELDS: &'static [FieldDescriptor<Self>];

    /// Record name to use when creating fresh metadata. `None` generates one.
    fn record_name(&self) -> Option<String> {
        None
    }

    /// Asset capability, for entities that carry a blob.
    fn asset_field(&self) -> Option<&dyn HasAssetField> {
        None
    }

    /// Mutable asset capability.
    fn asset_field_mut(&mut self) -> Option<&mut dyn HasAssetField> {
        None
    }

    /// Partition this type lives in.
    fn partition() -> PartitionId {
        PartitionId::new(Self::PARTITION)
    }

    /// Record id carried by the metadata, if any.
    fn record_id(&self) -> Option<RecordId> {
        self.metadata().and_then(|m| m.record_id().ok())
    }

    /// Assigns fresh metadata, for an entity about to be created remotely.
    fn fill_new_metadata(&mut self) -> CodecResult<()> {
        let name = self
            .record_name()
            .unwrap_or_else(|| RecordId::generate(Self::partition()).name);
        let id = RecordId::new(Self::partition(), name);
        let metadata = SystemMetadata::fresh(Self::RECORD_TYPE, id)?;
        self.set_metadata(Some(metadata));
        Ok(())
    }
}

/// Object-safe view of any entity, used for relationship fields.
pub trait EntityObject {
    /// Record type tag of the entity.
    fn entity_record_type(&self) -> &'static str;

    /// System metadata of the entity.
    fn entity_metadata(&self) -> Option<&SystemMetadata>;

    /// Whether the entity exists remotely.
    fn entity_saved(&self) -> bool;

    /// Encodes the entity and everything it references, children first.
    fn encode_tree(
        &mut self,
        codec: &RecordCodec,
        out: &mut Vec<RemoteRecord>,
    ) -> CodecResult<RecordId>;
}

impl<E: Entity> EntityObject for E {
    fn entity_record_type(&self) -> &'static str {
        E::RECORD_TYPE
    }

    fn entity_metadata(&self) -> Option<&SystemMetadata> {
        self.metadata()
    }

    fn entity_saved(&self) -> bool {
        self.is_saved_remotely()
    }

    fn encode_tree(
        &mut self,
        codec: &RecordCodec,
        out: &mut Vec<RemoteRecord>,
    ) -> CodecResult<RecordId> {
        if self.metadata().is_none() {
            self.fill_new_metadata()?;
        }
        codec.encode_node(self, out)
    }
}

/// Looks up records by name while decoding relationships.
pub trait RecordResolver {
    /// Returns the record with the given record name.
    fn resolve(&self, name: &str) -> Option<&RemoteRecord>;
}

/// A resolver that knows no records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl RecordResolver for NoResolver {
    fn resolve(&self, _name: &str) -> Option<&RemoteRecord> {
        None
    }
}

/// An in-memory resolver built from a set of records.
#[derive(Debug, Default, Clone)]
pub struct RecordIndex {
    records: HashMap<String, RemoteRecord>,
}

impl RecordIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, replacing any record with the same name.
    pub fn insert(&mut self, record: RemoteRecord) {
        self.records.insert(record.id.name.clone(), record);
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<RemoteRecord> for RecordIndex {
    fn from_iter<I: IntoIterator<Item = RemoteRecord>>(iter: I) -> Self {
        let mut index = Self::new();
        for record in iter {
            index.insert(record);
        }
        index
    }
}

impl RecordResolver for RecordIndex {
    fn resolve(&self, name: &str) -> Option<&RemoteRecord> {
        self.records.get(name)
    }
}

/// Handed to relationship setters so they can decode nested records.
pub struct DecodeContext<'a> {
    pub(crate) codec: &'a RecordCodec,
    pub(crate) resolver: &'a dyn RecordResolver,
}

impl DecodeContext<'_> {
    /// Decodes a referenced record into a nested entity.
    pub fn decode<C: Entity>(&self, record: &RemoteRecord) -> CodecResult<C> {
        self.codec.to_local_entity_with(record, self.resolver)
    }

    /// Decodes a list of referenced records.
    pub fn decode_all<C: Entity>(&self, records: &[&RemoteRecord]) -> CodecResult<Vec<C>> {
        records.iter().map(|record| self.decode(record)).collect()
    }
}

/// Getter of a value field.
pub type ValueGetter<E> = fn(&E) -> Option<FieldValue>;
/// Setter of a value field.
pub type ValueSetter<E> = fn(&mut E, FieldValue) -> CodecResult<()>;
/// Setter of a single relationship, given the referenced record.
pub type EntitySetter<E> = fn(&mut E, &RemoteRecord, &DecodeContext<'_>) -> CodecResult<()>;
/// Setter of a list relationship, given the referenced records in order.
pub type EntitiesSetter<E> = fn(&mut E, &[&RemoteRecord], &DecodeContext<'_>) -> CodecResult<()>;

/// How the codec reads and writes one field.
pub enum Accessor<E: 'static> {
    /// Scalar or homogeneous list of scalars, exchanged as a `FieldValue`.
    Value {
        /// Reads the value; `None` means unset.
        get: ValueGetter<E>,
        /// Writes a value read from a record.
        set: ValueSetter<E>,
    },
    /// A single related entity, stored remotely as a reference.
    Entity {
        /// Reads the related entity.
        get: fn(&E) -> Option<&dyn EntityObject>,
        /// Mutable access, for tree encoding.
        get_mut: fn(&mut E) -> Option<&mut dyn EntityObject>,
        /// Decodes the related entity from its record.
        set: EntitySetter<E>,
    },
    /// A list of related entities, stored remotely as a reference list.
    Entities {
        /// Reads the related entities.
        get: fn(&E) -> Vec<&dyn EntityObject>,
        /// Mutable access, for tree encoding.
        get_mut: fn(&mut E) -> Vec<&mut dyn EntityObject>,
        /// Decodes the related entities from their records.
        set: EntitiesSetter<E>,
    },
    /// Shadow id of a single relationship. Never sent as its own value.
    ReferenceId {
        /// Reads the shadow id.
        get: fn(&E) -> Option<&str>,
        /// Writes the shadow id.
        set: fn(&mut E, Option<String>),
    },
    /// Shadow ids of a list relationship. Never sent as its own value.
    ReferenceIds {
        /// Reads the shadow ids.
        get: fn(&E) -> &[String],
        /// Writes the shadow ids.
        set: fn(&mut E, Vec<String>),
    },
}

/// One named field of an entity.
pub struct FieldDescriptor<E: 'static> {
    /// Field name, identical on the entity and the record.
    pub name: &'static str,
    /// Accessor functions.
    pub accessor: Accessor<E>,
}

impl<E: 'static> FieldDescriptor<E> {
    /// A value field.
    pub const fn value(name: &'static str, get: ValueGetter<E>, set: ValueSetter<E>) -> Self {
        Self {
            name,
            accessor: Accessor::Value { get, set },
        }
    }

    /// A single relationship field.
    pub const fn entity(
        name: &'static str,
        get: fn(&E) -> Option<&dyn EntityObject>,
        get_mut: fn(&mut E) -> Option<&mut dyn EntityObject>,
        set: EntitySetter<E>,
    ) -> Self {
        Self {
            name,
            accessor: Accessor::Entity { get, get_mut, set },
        }
    }

    /// A list relationship field.
    pub const fn entities(
        name: &'static str,
        get: fn(&E) -> Vec<&dyn EntityObject>,
        get_mut: fn(&mut E) -> Vec<&mut dyn EntityObject>,
        set: EntitiesSetter<E>,
    ) -> Self {
        Self {
            name,
            accessor: Accessor::Entities { get, get_mut, set },
        }
    }

    /// Shadow id field of a single relationship. `name` must end with `_refid`.
    pub const fn reference_id(
        name: &'static str,
        get: fn(&E) -> Option<&str>,
        set: fn(&mut E, Option<String>),
    ) -> Self {
        Self {
            name,
            accessor: Accessor::ReferenceId { get, set },
        }
    }

    /// Shadow ids field of a list relationship. `name` must end with `_refids`.
    pub const fn reference_ids(
        name: &'static str,
        get: fn(&E) -> &[String],
        set: fn(&mut E, Vec<String>),
    ) -> Self {
        Self {
            name,
            accessor: Accessor::ReferenceIds { get, set },
        }
    }

    /// Returns true for shadow id fields.
    pub fn is_shadow(&self) -> bool {
        matches!(
            self.accessor,
            Accessor::ReferenceId { .. } | Accessor::ReferenceIds { .. }
        )
    }
}

/// Finds the shadow descriptor paired with a relationship field.
pub(crate) fn shadow_of<E: Entity>(
    field: &str,
    suffix: &str,
) -> Option<&'static FieldDescriptor<E>> {
    E::FIELDS.iter().find(|candidate| {
        candidate.is_shadow()
            && candidate.name.len() == field.len() + suffix.len()
            && candidate.name.starts_with(field)
            && candidate.name.ends_with(suffix)
    })
}

/// Checks that the descriptor table describes a record.
pub(crate) fn validate_shape<E: Entity>(reserved: &[&str], reserved_prefix: &str) -> CodecResult<()> {
    if E::RECORD_TYPE.trim().is_empty() {
        return Err(CodecError::structural("record type is empty"));
    }
    if E::PARTITION.trim().is_empty() {
        return Err(CodecError::structural(format!(
            "{} has no partition",
            E::RECORD_TYPE
        )));
    }

    let mut seen = Vec::with_capacity(E::FIELDS.len());
    for field in E::FIELDS {
        let name = field.name;
        if name.is_empty() {
            return Err(CodecError::structural("field with empty name"));
        }
        if name == METADATA_FIELD || reserved.contains(&name) || name.starts_with(reserved_prefix)
        {
            return Err(CodecError::structural(format!(
                "field name {name} is reserved"
            )));
        }
        if seen.contains(&name) {
            return Err(CodecError::structural(format!(
                "field {name} is declared twice"
            )));
        }
        seen.push(name);

        let shadow_name =
            name.ends_with(REFERENCE_ID_SUFFIX) || name.ends_with(REFERENCE_IDS_SUFFIX);
        let well_formed = match field.accessor {
            Accessor::ReferenceId { .. } => name.ends_with(REFERENCE_ID_SUFFIX),
            Accessor::ReferenceIds { .. } => name.ends_with(REFERENCE_IDS_SUFFIX),
            _ => !shadow_name,
        };
        if !well_formed {
            return Err(CodecError::structural(format!(
                "field {name} does not match its reference suffix"
            )));
        }
    }
    Ok(())
}
