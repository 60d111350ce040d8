//! LOB reference tracking.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use strata_common::{LobKind, LobValue, Result, StrataError, Tuple, TypeId, Value};
use strata_storage::FileStore;

/// Where tracked LOB content is kept.
#[derive(Debug, Clone)]
enum LobContent {
    Inline(Bytes),
    Stored { offset: u64, len: usize },
}

#[derive(Debug, Clone)]
struct LobEntry {
    kind: LobKind,
    content: LobContent,
}

/// Keeps LOB content resolvable after tuples lose it to serialization.
///
/// The first value seen for an id with content registers it; any later value
/// carrying only that id is rehydrated in place. With a backing store,
/// content above the inline limit is copied there so it outlives the
/// producer's buffers.
pub struct LobManager {
    /// Column positions holding LOB values.
    positions: Vec<usize>,
    entries: Mutex<HashMap<String, LobEntry>>,
    store: Option<Arc<dyn FileStore>>,
    inline_limit: usize,
}

impl LobManager {
    /// Returns the LOB-typed column positions, or `None` for a LOB-free schema.
    pub fn compute_lob_positions(types: &[TypeId]) -> Option<Vec<usize>> {
        let positions: Vec<usize> = types
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_lob())
            .map(|(i, _)| i)
            .collect();
        if positions.is_empty() {
            None
        } else {
            Some(positions)
        }
    }

    /// Creates a tracker for the given LOB column positions. Content stays inline.
    pub fn new(positions: Vec<usize>) -> Self {
        Self {
            positions,
            entries: Mutex::new(HashMap::new()),
            store: None,
            inline_limit: usize::MAX,
        }
    }

    /// Creates a tracker for a schema, or `None` if it has no LOB columns.
    pub fn for_types(types: &[TypeId]) -> Option<Self> {
        Self::compute_lob_positions(types).map(Self::new)
    }

    /// Copies content longer than `inline_limit` bytes into `store`.
    pub fn with_store(mut self, store: Arc<dyn FileStore>, inline_limit: usize) -> Self {
        self.store = Some(store);
        self.inline_limit = inline_limit;
        self
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Number of tracked references.
    pub fn lob_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn has_lobs(&self) -> bool {
        !self.entries.lock().is_empty()
    }

    /// Registers LOB values that carry content and rehydrates those that
    /// carry only an id.
    pub fn update_references(&self, tuple: &mut Tuple) -> Result<()> {
        for &pos in &self.positions {
            let Some(Value::Lob(lob)) = tuple.values_mut().get_mut(pos) else {
                continue;
            };
            if let Some(content) = lob.content().cloned() {
                if !self.entries.lock().contains_key(lob.id()) {
                    self.register(lob.id(), lob.kind(), content)?;
                }
            } else {
                let content = self.load(lob.id())?;
                lob.set_content(content);
            }
        }
        Ok(())
    }

    /// Returns the value registered under `id`, with its content.
    pub fn resolve(&self, id: &str) -> Result<LobValue> {
        let kind = self
            .entries
            .lock()
            .get(id)
            .map(|e| e.kind)
            .ok_or_else(|| StrataError::LobNotFound(id.to_string()))?;
        let mut lob = LobValue::reference(id, kind);
        lob.set_content(self.load(id)?);
        Ok(lob)
    }

    /// Drops every tracked reference. Stored content is discarded.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        if let Some(store) = &self.store {
            if !store.is_removed() {
                if let Err(e) = store.set_len(0) {
                    tracing::warn!(store = store.name(), error = %e, "failed to truncate lob store");
                }
            }
        }
    }

    /// Drops every reference and releases the backing store.
    pub fn remove(&self) {
        self.entries.lock().clear();
        if let Some(store) = &self.store {
            store.remove();
        }
    }

    fn register(&self, id: &str, kind: LobKind, content: Bytes) -> Result<()> {
        let content = match &self.store {
            Some(store) if content.len() > self.inline_limit => {
                let offset = store.append(&content)?;
                LobContent::Stored {
                    offset,
                    len: content.len(),
                }
            }
            _ => LobContent::Inline(content),
        };
        self.entries
            .lock()
            .insert(id.to_string(), LobEntry { kind, content });
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Bytes> {
        let content = self
            .entries
            .lock()
            .get(id)
            .map(|e| e.content.clone())
            .ok_or_else(|| StrataError::LobNotFound(id.to_string()))?;
        match content {
            LobContent::Inline(bytes) => Ok(bytes),
            LobContent::Stored { offset, len } => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| StrataError::Internal(format!("lob {} stored without a store", id)))?;
                Ok(Bytes::from(store.read(offset, len)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use strata_storage::MemoryStore;

    fn create_test_tuple(lob: LobValue) -> Tuple {
        Tuple::new(vec![Value::Int64(1), Value::Lob(lob)])
    }

    const TYPES: &[TypeId] = &[TypeId::Int64, TypeId::Blob];

    #[test]
    fn test_compute_lob_positions() {
        assert_eq!(
            LobManager::compute_lob_positions(&[TypeId::Int32, TypeId::Clob, TypeId::Blob]),
            Some(vec![1, 2])
        );
        assert_eq!(LobManager::compute_lob_positions(&[TypeId::Varchar]), None);
        assert!(LobManager::for_types(&[TypeId::Int64]).is_none());
    }

    #[test]
    fn test_register_then_rehydrate() {
        let manager = LobManager::for_types(TYPES).unwrap();
        let lob = LobValue::new(LobKind::Blob, vec![1u8, 2, 3, 4]);
        let mut tuple = create_test_tuple(lob.clone());
        manager.update_references(&mut tuple).unwrap();
        assert_eq!(manager.lob_count(), 1);

        let mut copy = create_test_tuple(lob.to_reference());
        manager.update_references(&mut copy).unwrap();
        let restored = copy.get(1).and_then(Value::as_lob).unwrap();
        assert_eq!(restored.content(), lob.content());
    }

    #[test]
    fn test_unknown_reference_fails() {
        let manager = LobManager::for_types(TYPES).unwrap();
        let mut tuple = create_test_tuple(LobValue::reference("lob-missing", LobKind::Blob));
        let err = manager.update_references(&mut tuple).unwrap_err();
        assert!(matches!(err, StrataError::LobNotFound(ref id) if id == "lob-missing"));
        assert!(manager.resolve("lob-missing").is_err());
    }

    #[test]
    fn test_null_lob_column_is_skipped() {
        let manager = LobManager::for_types(TYPES).unwrap();
        let mut tuple = Tuple::new(vec![Value::Int64(1), Value::Null]);
        manager.update_references(&mut tuple).unwrap();
        assert!(!manager.has_lobs());
    }

    #[test]
    fn test_large_content_goes_to_store() {
        let store: Arc<dyn FileStore> = Arc::new(MemoryStore::new("lobs"));
        let manager = LobManager::for_types(TYPES)
            .unwrap()
            .with_store(store.clone(), 16);

        let small = LobValue::new(LobKind::Blob, vec![7u8; 8]);
        let large = LobValue::new(LobKind::Blob, vec![9u8; 4096]);
        manager.update_references(&mut create_test_tuple(small.clone())).unwrap();
        manager.update_references(&mut create_test_tuple(large.clone())).unwrap();
        assert_eq!(store.len().unwrap(), 4096);

        let resolved = manager.resolve(large.id()).unwrap();
        let mut content = Vec::new();
        resolved.stream().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, vec![9u8; 4096]);
        assert_eq!(manager.resolve(small.id()).unwrap().content(), small.content());
    }

    #[test]
    fn test_clear_and_remove() {
        let store: Arc<dyn FileStore> = Arc::new(MemoryStore::new("lobs"));
        let manager = LobManager::for_types(TYPES).unwrap().with_store(store.clone(), 0);
        let lob = LobValue::new(LobKind::Blob, vec![1u8; 32]);
        manager.update_references(&mut create_test_tuple(lob.clone())).unwrap();

        manager.clear();
        assert_eq!(manager.lob_count(), 0);
        assert_eq!(store.len().unwrap(), 0);
        assert!(manager.resolve(lob.id()).is_err());

        manager.remove();
        manager.remove();
        assert!(store.is_removed());
    }
}
