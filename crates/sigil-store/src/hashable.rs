//! The hashable value contract.
//!
//! Any value used as a value-index key must produce a stable string digest
//! for itself. The [`ValueIndex`](crate::value_index::ValueIndex) buckets ids
//! by that digest alone, so two values with equal digests land in the same
//! bucket. Indexing is exactly as precise as the digest is injective over the
//! values stored under it.

use serde::Serialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Hashable
// ---------------------------------------------------------------------------

/// A value that can produce a stable digest string.
///
/// The digest must be a pure function of the value: equal values must yield
/// equal digests across calls and across manager instances.
pub trait Hashable {
    /// Stable digest of this value.
    fn digest(&self) -> String;
}

impl Hashable for str {
    fn digest(&self) -> String {
        self.to_owned()
    }
}

impl Hashable for String {
    fn digest(&self) -> String {
        self.clone()
    }
}

macro_rules! impl_hashable_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Hashable for $ty {
                fn digest(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_hashable_display!(bool, char, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, isize, usize);

impl<T: Hashable + ?Sized> Hashable for &T {
    fn digest(&self) -> String {
        (**self).digest()
    }
}

// ---------------------------------------------------------------------------
// structural_digest
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest of the value's JSON encoding.
///
/// Convenient for components whose serialized form is canonical (structs and
/// enums with a fixed field order). Maps with non-deterministic iteration
/// order, such as `HashMap`, should hand-roll their digest instead.
///
/// A value that fails to serialize yields an empty digest and a warning; all
/// such values share a single bucket.
pub fn structural_digest<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_vec(value) {
        Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
        Err(e) => {
            warn!(
                value_type = std::any::type_name::<T>(),
                error = %e,
                "value is not JSON-serializable -- using empty digest"
            );
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
