//! # CloudCache Codec
//!
//! Marshalling between local typed entities and generic remote records, plus
//! the local blob cache.
//!
//! Entities describe their shape with a static table of `FieldDescriptor`s:
//!
//! - `Value` fields hold scalars or homogeneous lists of scalars
//! - `Entity` / `Entities` fields hold related entities, sent as references
//! - `ReferenceId` / `ReferenceIds` fields (`<field>_refid`, `<field>_refids`)
//!   shadow a relationship with the related record names, so a relationship
//!   can be rebuilt later when the related record was not at hand
//!
//! Blobs are cached per record type by `AssetStore` and mirrored on the
//! record under `AssetFilename_<type>` and `assetFilename`.
//!
//! Everything here is synchronous and codec errors are never retried.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod asset;
mod codec;
mod entity;
mod error;

pub use asset::{referenced_filenames, AssetStore, ASSET_EXTENSION};
pub use codec::{asset_field_name, RecordCodec, ASSET_FIELD_PREFIX, ASSET_FILENAME_FIELD};
pub use entity::{
    Accessor, DecodeContext, EntitiesSetter, Entity, EntityObject, EntitySetter,
    FieldDescriptor, HasAssetField, HasMetadata, NoResolver, RecordIndex, RecordResolver,
    ValueGetter, ValueSetter, METADATA_FIELD, REFERENCE_IDS_SUFFIX, REFERENCE_ID_SUFFIX,
};
pub use error::{AssetError, AssetResult, CodecError, CodecResult};
