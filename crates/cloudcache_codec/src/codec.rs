//! Conversion between local entities and remote records.

use crate::asset::AssetStore;
use crate::entity::{
    shadow_of, validate_shape, Accessor, DecodeContext, Entity, EntityObject, NoResolver,
    RecordResolver, REFERENCE_IDS_SUFFIX, REFERENCE_ID_SUFFIX,
};
use crate::error::{CodecError, CodecResult};
use cloudcache_protocol::{Asset, FieldValue, RecordId, RemoteRecord};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of the record field carrying an entity's blob.
pub const ASSET_FIELD_PREFIX: &str = "AssetFilename_";

/// Plain text record field carrying the blob's local filename.
pub const ASSET_FILENAME_FIELD: &str = "assetFilename";

/// Name of the record field carrying the blob of a record type.
pub fn asset_field_name(record_type: &str) -> String {
    format!("{ASSET_FIELD_PREFIX}{record_type}")
}

/// Converts entities to records and back.
///
/// The codec is stateless apart from the optional asset root, under which
/// blobs of each record type are cached in their own directory.
#[derive(Debug, Clone, Default)]
pub struct RecordCodec {
    asset_root: Option<PathBuf>,
}

impl RecordCodec {
    /// Creates a codec without blob support.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec caching blobs under `root`.
    pub fn with_asset_root(root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: Some(root.into()),
        }
    }

    /// Asset root, if configured.
    pub fn asset_root(&self) -> Option<&Path> {
        self.asset_root.as_deref()
    }

    /// Opens the asset store of a record type.
    pub fn asset_store(&self, record_type: &str) -> CodecResult<Option<AssetStore>> {
        match &self.asset_root {
            Some(root) => Ok(Some(AssetStore::open(root, record_type)?)),
            None => Ok(None),
        }
    }

    // ---- decoding ----

    /// Decodes a record without resolving relationships.
    ///
    /// Relationship fields only populate their shadow id fields.
    pub fn to_local_entity<E: Entity>(&self, record: &RemoteRecord) -> CodecResult<E> {
        self.to_local_entity_with(record, &NoResolver)
    }

    /// Decodes a record, decoding related records the resolver knows about.
    ///
    /// Decoding the same record twice yields equal entities.
    pub fn to_local_entity_with<E: Entity>(
        &self,
        record: &RemoteRecord,
        resolver: &dyn RecordResolver,
    ) -> CodecResult<E> {
        self.validate::<E>()?;
        if record.record_type != E::RECORD_TYPE {
            return Err(CodecError::RecordTypeMismatch {
                expected: E::RECORD_TYPE.to_string(),
                found: record.record_type.clone(),
            });
        }

        let mut entity = E::default();
        entity.set_metadata(Some(record.metadata.clone()));
        entity.set_saved_remotely(true);

        let ctx = DecodeContext {
            codec: self,
            resolver,
        };

        for field in E::FIELDS {
            let Some(value) = record.get(field.name) else {
                continue;
            };
            match &field.accessor {
                Accessor::Value { set, .. } => set(&mut entity, value.clone())?,
                Accessor::Entity { set, .. } => {
                    let id = value.as_reference().ok_or_else(|| {
                        CodecError::field_mismatch(field.name, "reference", value.kind())
                    })?;
                    match resolver.resolve(&id.name) {
                        Some(child) => set(&mut entity, child, &ctx)?,
                        None => set_shadow_id(&mut entity, field.name, id.name.clone()),
                    }
                }
                Accessor::Entities { set, .. } => {
                    let ids = value.as_reference_list().ok_or_else(|| {
                        CodecError::field_mismatch(field.name, "reference_list", value.kind())
                    })?;
                    let children: Option<Vec<&RemoteRecord>> =
                        ids.iter().map(|id| resolver.resolve(&id.name)).collect();
                    match children {
                        Some(children) => set(&mut entity, &children, &ctx)?,
                        None => set_shadow_ids(
                            &mut entity,
                            field.name,
                            ids.iter().map(|id| id.name.clone()).collect(),
                        ),
                    }
                }
                Accessor::ReferenceId { set, .. } => {
                    let id = value.as_text().ok_or_else(|| {
                        CodecError::field_mismatch(field.name, "text", value.kind())
                    })?;
                    set(&mut entity, Some(id.to_string()));
                }
                Accessor::ReferenceIds { set, .. } => {
                    let ids = value.as_text_list().ok_or_else(|| {
                        CodecError::field_mismatch(field.name, "text_list", value.kind())
                    })?;
                    set(&mut entity, ids.to_vec());
                }
            }
        }

        self.read_asset(&mut entity, record)?;
        Ok(entity)
    }

    /// Resolves relationships that decoding left as shadow ids.
    ///
    /// Only relationships whose value is still empty are touched. Returns the
    /// number of relationships rebuilt.
    pub fn rebuild_references<E: Entity>(
        &self,
        entity: &mut E,
        resolver: &dyn RecordResolver,
    ) -> CodecResult<usize> {
        self.validate::<E>()?;
        let ctx = DecodeContext {
            codec: self,
            resolver,
        };
        let mut rebuilt = 0;

        for field in E::FIELDS {
            match &field.accessor {
                Accessor::Entity { get, set, .. } => {
                    if get(entity).is_some() {
                        continue;
                    }
                    let Some(shadow) = shadow_of::<E>(field.name, REFERENCE_ID_SUFFIX) else {
                        continue;
                    };
                    let Accessor::ReferenceId { get: shadow_get, .. } = &shadow.accessor else {
                        continue;
                    };
                    let Some(name) = shadow_get(entity).map(str::to_string) else {
                        continue;
                    };
                    if let Some(record) = resolver.resolve(&name) {
                        set(entity, record, &ctx)?;
                        rebuilt += 1;
                    }
                }
                Accessor::Entities { get, set, .. } => {
                    if !get(entity).is_empty() {
                        continue;
                    }
                    let Some(shadow) = shadow_of::<E>(field.name, REFERENCE_IDS_SUFFIX) else {
                        continue;
                    };
                    let Accessor::ReferenceIds { get: shadow_get, .. } = &shadow.accessor else {
                        continue;
                    };
                    let names = shadow_get(entity).to_vec();
                    if names.is_empty() {
                        continue;
                    }
                    let records: Option<Vec<&RemoteRecord>> =
                        names.iter().map(|name| resolver.resolve(name)).collect();
                    if let Some(records) = records {
                        set(entity, &records, &ctx)?;
                        rebuilt += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(rebuilt)
    }

    // ---- encoding ----

    /// Encodes an entity that already carries metadata.
    ///
    /// Related entities are written as references and must have been saved
    /// remotely. Shadow id fields are never written.
    pub fn to_remote_record<E: Entity>(&self, entity: &E) -> CodecResult<RemoteRecord> {
        self.validate::<E>()?;
        let mut record = self.empty_record(entity)?;

        for field in E::FIELDS {
            match &field.accessor {
                Accessor::Value { get, .. } => {
                    if let Some(value) = get(entity) {
                        put_value(&mut record, field.name, value)?;
                    }
                }
                Accessor::Entity { get, .. } => {
                    if let Some(child) = get(entity) {
                        let id = reference_to(field.name, child)?;
                        record.set(field.name, FieldValue::Reference(id));
                    }
                }
                Accessor::Entities { get, .. } => {
                    let ids = get(entity)
                        .into_iter()
                        .map(|child| reference_to(field.name, child))
                        .collect::<CodecResult<Vec<_>>>()?;
                    if !ids.is_empty() {
                        record.set(field.name, FieldValue::ReferenceList(ids));
                    }
                }
                Accessor::ReferenceId { .. } | Accessor::ReferenceIds { .. } => {}
            }
        }

        self.write_asset(entity, &mut record)?;
        Ok(record)
    }

    /// Encodes an entity, first assigning fresh metadata when it has none and
    /// `init_metadata` is set.
    pub fn to_remote_record_with<E: Entity>(
        &self,
        entity: &mut E,
        init_metadata: bool,
    ) -> CodecResult<RemoteRecord> {
        if init_metadata && entity.metadata().is_none() {
            entity.fill_new_metadata()?;
        }
        self.to_remote_record(entity)
    }

    /// Encodes an entity and every entity it references.
    ///
    /// Related entities without metadata get fresh metadata, written back into
    /// them. Records are returned depth-first with children before their
    /// parent, so the root record comes last. Each parent record also
    /// carries the child ids in `<field>_refid` / `<field>_refids`.
    pub fn to_remote_record_tree<E: Entity>(&self, entity: &mut E) -> CodecResult<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        self.encode_node(entity, &mut records)?;
        Ok(records)
    }

    pub(crate) fn encode_node<E: Entity>(
        &self,
        entity: &mut E,
        out: &mut Vec<RemoteRecord>,
    ) -> CodecResult<RecordId> {
        self.validate::<E>()?;
        let mut record = self.empty_record(entity)?;
        let mut single_shadows = Vec::new();
        let mut list_shadows = Vec::new();

        for field in E::FIELDS {
            match &field.accessor {
                Accessor::Value { get, .. } => {
                    if let Some(value) = get(entity) {
                        put_value(&mut record, field.name, value)?;
                    }
                }
                Accessor::Entity { get_mut, .. } => {
                    if let Some(child) = get_mut(entity) {
                        let id = child.encode_tree(self, out)?;
                        record.set(
                            format!("{}{REFERENCE_ID_SUFFIX}", field.name),
                            FieldValue::Text(id.name.clone()),
                        );
                        single_shadows.push((field.name, id.name.clone()));
                        record.set(field.name, FieldValue::Reference(id));
                    }
                }
                Accessor::Entities { get_mut, .. } => {
                    let mut ids = Vec::new();
                    for child in get_mut(entity) {
                        ids.push(child.encode_tree(self, out)?);
                    }
                    if !ids.is_empty() {
                        let names: Vec<String> = ids.iter().map(|id| id.name.clone()).collect();
                        record.set(
                            format!("{}{REFERENCE_IDS_SUFFIX}", field.name),
                            FieldValue::TextList(names.clone()),
                        );
                        list_shadows.push((field.name, names));
                        record.set(field.name, FieldValue::ReferenceList(ids));
                    }
                }
                Accessor::ReferenceId { .. } | Accessor::ReferenceIds { .. } => {}
            }
        }

        for (field, name) in single_shadows {
            set_shadow_id(entity, field, name);
        }
        for (field, names) in list_shadows {
            set_shadow_ids(entity, field, names);
        }

        self.write_asset(entity, &mut record)?;
        let id = record.id.clone();
        out.push(record);
        Ok(id)
    }

    // ---- assets ----

    /// Stores `data` as the entity's blob, replacing any previous one.
    ///
    /// Returns the generated filename.
    pub fn set_asset_data<E: Entity>(&self, entity: &mut E, data: &[u8]) -> CodecResult<String> {
        let no_storage = || CodecError::NoAssetStorage {
            record_type: E::RECORD_TYPE.to_string(),
        };
        if entity.asset_field().is_none() {
            return Err(no_storage());
        }
        let store = self.asset_store(E::RECORD_TYPE)?.ok_or_else(no_storage)?;
        let id = entity
            .record_id()
            .ok_or_else(|| CodecError::MissingMetadata {
                record_type: E::RECORD_TYPE.to_string(),
            })?;

        let previous = entity
            .asset_field()
            .and_then(|slot| slot.asset_filename())
            .map(str::to_string);
        let filename = store.put(&id.name, data)?;
        if let Some(slot) = entity.asset_field_mut() {
            slot.set_asset_filename(Some(filename.clone()));
        }
        if let Some(previous) = previous {
            store.delete(&previous)?;
        }
        Ok(filename)
    }

    /// Reads the entity's blob from the local cache.
    pub fn asset_data<E: Entity>(&self, entity: &E) -> CodecResult<Option<Vec<u8>>> {
        let Some(filename) = entity.asset_field().and_then(|slot| slot.asset_filename()) else {
            return Ok(None);
        };
        match self.asset_store(E::RECORD_TYPE)? {
            Some(store) => Ok(store.get(filename)?),
            None => Ok(None),
        }
    }

    fn write_asset<E: Entity>(&self, entity: &E, record: &mut RemoteRecord) -> CodecResult<()> {
        let Some(filename) = entity.asset_field().and_then(|slot| slot.asset_filename()) else {
            return Ok(());
        };
        let Some(store) = self.asset_store(E::RECORD_TYPE)? else {
            debug!(record_type = E::RECORD_TYPE, "no asset root, blob not attached");
            return Ok(());
        };
        match store.get(filename)? {
            Some(data) => {
                record.set(
                    asset_field_name(E::RECORD_TYPE),
                    FieldValue::Asset(Asset {
                        filename: filename.to_string(),
                        data,
                    }),
                );
                record.set(ASSET_FILENAME_FIELD, FieldValue::Text(filename.to_string()));
            }
            None => debug!(%filename, "blob missing from local cache, not attached"),
        }
        Ok(())
    }

    fn read_asset<E: Entity>(&self, entity: &mut E, record: &RemoteRecord) -> CodecResult<()> {
        if entity.asset_field().is_none() {
            return Ok(());
        }
        let asset = record
            .get(&asset_field_name(E::RECORD_TYPE))
            .and_then(FieldValue::as_asset);
        let filename = record
            .get(ASSET_FILENAME_FIELD)
            .and_then(FieldValue::as_text)
            .or(asset.map(|a| a.filename.as_str()));
        let Some(filename) = filename else {
            return Ok(());
        };

        if let (Some(asset), Some(store)) = (asset, self.asset_store(E::RECORD_TYPE)?) {
            if !store.contains(filename) {
                debug!(%filename, "caching downloaded blob");
                store.write_named(filename, &asset.data)?;
            }
        }
        if let Some(slot) = entity.asset_field_mut() {
            slot.set_asset_filename(Some(filename.to_string()));
        }
        Ok(())
    }

    // ---- helpers ----

    fn validate<E: Entity>(&self) -> CodecResult<()> {
        validate_shape::<E>(&[ASSET_FILENAME_FIELD], ASSET_FIELD_PREFIX)
    }

    fn empty_record<E: Entity>(&self, entity: &E) -> CodecResult<RemoteRecord> {
        let metadata = entity
            .metadata()
            .cloned()
            .ok_or_else(|| CodecError::MissingMetadata {
                record_type: E::RECORD_TYPE.to_string(),
            })?;
        let record = RemoteRecord::from_metadata(metadata)?;
        if record.record_type != E::RECORD_TYPE {
            return Err(CodecError::RecordTypeMismatch {
                expected: E::RECORD_TYPE.to_string(),
                found: record.record_type,
            });
        }
        Ok(record)
    }
}

fn reference_to(field: &str, child: &dyn EntityObject) -> CodecResult<RecordId> {
    match child.entity_metadata() {
        Some(metadata) if child.entity_saved() => Ok(metadata.record_id()?),
        _ => Err(CodecError::unsaved(field)),
    }
}

fn put_value(record: &mut RemoteRecord, field: &str, value: FieldValue) -> CodecResult<()> {
    let value = match value {
        FieldValue::List(items) => normalize_list(field, items)?,
        other => other,
    };
    if !value.is_empty_list() {
        record.set(field, value);
    }
    Ok(())
}

/// Turns an untyped list into the typed list the remote store accepts.
fn normalize_list(field: &str, items: Vec<FieldValue>) -> CodecResult<FieldValue> {
    let Some(first) = items.first() else {
        return Ok(FieldValue::List(Vec::new()));
    };
    let kind = first.kind();
    if let Some(odd) = items.iter().find(|item| item.kind() != kind) {
        return Err(CodecError::unsupported(
            field,
            format!("list mixing {kind} and {}", odd.kind()),
        ));
    }

    macro_rules! collect {
        ($variant:ident, $list:ident) => {
            FieldValue::$list(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        FieldValue::$variant(v) => Some(v),
                        _ => None,
                    })
                    .collect(),
            )
        };
    }

    let list = match first {
        FieldValue::Text(_) => collect!(Text, TextList),
        FieldValue::Int(_) => collect!(Int, IntList),
        FieldValue::Double(_) => collect!(Double, DoubleList),
        FieldValue::Bool(_) => collect!(Bool, BoolList),
        FieldValue::Bytes(_) => collect!(Bytes, BytesList),
        FieldValue::Timestamp(_) => collect!(Timestamp, TimestampList),
        FieldValue::Location(_) => collect!(Location, LocationList),
        FieldValue::Reference(_) => collect!(Reference, ReferenceList),
        other => {
            return Err(CodecError::unsupported(
                field,
                format!("list of {}", other.kind()),
            ))
        }
    };
    Ok(list)
}

fn set_shadow_id<E: Entity>(entity: &mut E, field: &str, name: String) {
    match shadow_of::<E>(field, REFERENCE_ID_SUFFIX).map(|d| &d.accessor) {
        Some(Accessor::ReferenceId { set, .. }) => set(entity, Some(name)),
        _ => debug!(field, "no shadow field, reference id dropped"),
    }
}

fn set_shadow_ids<E: Entity>(entity: &mut E, field: &str, names: Vec<String>) {
    match shadow_of::<E>(field, REFERENCE_IDS_SUFFIX).map(|d| &d.accessor) {
        Some(Accessor::ReferenceIds { set, .. }) => set(entity, names),
        _ => debug!(field, "no shadow field, reference ids dropped"),
    }
}
