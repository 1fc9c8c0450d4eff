//! Evidence - canonical encoding, bundle assembly and content hashing

mod bundle;
mod canonical;

pub use bundle::{
    build_bundle, hash_bundle, hash_prefix, is_full_hash, is_hash_prefix, replay_index,
    BundleMetadata, FULL_HASH_LEN, HASH_PREFIX_LEN,
};
pub use canonical::canonicalize;
