use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CacheError, CacheResult};
use crate::hash::FeatureHash;

/// One built feature held by the cache
pub(crate) struct CacheEntry {
    hash: FeatureHash,
    tag: &'static str,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
    uses: AtomicU64,
    last_used: AtomicU64,
}

impl CacheEntry {
    /// A freshly built entry counts as used once
    pub(crate) fn new<T: Any + Send + Sync>(
        hash: FeatureHash,
        tag: &'static str,
        value: Arc<T>,
        tick: u64,
    ) -> Self {
        Self {
            hash,
            tag,
            type_name: std::any::type_name::<T>(),
            payload: value,
            uses: AtomicU64::new(1),
            last_used: AtomicU64::new(tick),
        }
    }

    pub(crate) fn tag(&self) -> &'static str {
        self.tag
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    pub(crate) fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Record one more use at `tick`
    pub(crate) fn touch(&self, tick: u64) {
        self.uses.fetch_add(1, Ordering::Relaxed);
        self.last_used.fetch_max(tick, Ordering::Relaxed);
    }

    /// True while a caller still holds a handle to the payload
    pub(crate) fn is_referenced(&self) -> bool {
        Arc::strong_count(&self.payload) > 1
    }

    /// Typed handle to the payload, checking both the feature tag and the
    /// concrete type
    pub(crate) fn typed<T: Any + Send + Sync>(
        &self,
        expected: &'static str,
    ) -> CacheResult<Arc<T>> {
        if self.tag != expected {
            return Err(CacheError::TypeMismatch {
                hash: self.hash,
                expected,
                found: self.tag,
            });
        }
        Arc::clone(&self.payload)
            .downcast::<T>()
            .map_err(|_| CacheError::TypeMismatch {
                hash: self.hash,
                expected: std::any::type_name::<T>(),
                found: self.type_name,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_checks_tag_and_type() {
        let hash = FeatureHash::from_bytes(b"entry");
        let entry = CacheEntry::new(hash, "Box", Arc::new(5u32), 1);

        assert_eq!(*entry.typed::<u32>("Box").unwrap(), 5);
        assert!(matches!(
            entry.typed::<u32>("Sphere"),
            Err(CacheError::TypeMismatch { found: "Box", .. })
        ));
        assert!(entry.typed::<String>("Box").is_err());
    }

    #[test]
    fn test_touch_and_references() {
        let value = Arc::new(String::from("solid"));
        let entry = CacheEntry::new(FeatureHash::from_bytes(b"e"), "Box", Arc::clone(&value), 3);
        assert_eq!(entry.uses(), 1);
        assert!(entry.is_referenced());

        entry.touch(7);
        entry.touch(5);
        assert_eq!(entry.uses(), 3);
        assert_eq!(entry.last_used(), 7);

        drop(value);
        assert!(!entry.is_referenced());
    }
}
