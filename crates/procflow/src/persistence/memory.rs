//! In-memory implementation of SubscriptionStore

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::store::*;
use crate::execution::TokenId;
use crate::subscription::{OccurrenceKind, SubscriptionEntry};

/// In-memory implementation of SubscriptionStore
///
/// Entries are grouped per token in a sharded map. Every operation on one
/// token runs under that token's shard lock, which gives the per-token
/// atomicity the trait requires while leaving sibling tokens on other
/// shards uncontended.
///
/// # Example
///
/// ```
/// use procflow::InMemorySubscriptionStore;
///
/// let store = InMemorySubscriptionStore::new();
/// assert!(store.is_empty());
/// ```
pub struct InMemorySubscriptionStore {
    entries: DashMap<TokenId, Vec<SubscriptionEntry>>,
}

impl InMemorySubscriptionStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Total number of live entries
    pub fn len(&self) -> usize {
        self.entries.iter().map(|slot| slot.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tokens holding at least one entry
    pub fn token_count(&self) -> usize {
        self.entries.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn prune(&self, token_id: TokenId) {
        self.entries.remove_if(&token_id, |_, slot| slot.is_empty());
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn insert(&self, entry: SubscriptionEntry) -> Result<(), StoreError> {
        let mut slot = self.entries.entry(entry.token_id).or_default();

        if slot.iter().any(|e| e.same_key(&entry)) {
            return Err(StoreError::duplicate(&entry));
        }

        slot.push(entry);
        Ok(())
    }

    async fn upsert(
        &self,
        entry: SubscriptionEntry,
    ) -> Result<Option<SubscriptionEntry>, StoreError> {
        let mut slot = self.entries.entry(entry.token_id).or_default();

        let existing = slot.iter().position(|e| e.same_key(&entry));
        match existing {
            Some(pos) => Ok(Some(std::mem::replace(&mut slot[pos], entry))),
            None => {
                slot.push(entry);
                Ok(None)
            }
        }
    }

    async fn replace(&self, old_id: Uuid, entry: SubscriptionEntry) -> Result<(), StoreError> {
        let mut slot = self
            .entries
            .get_mut(&entry.token_id)
            .ok_or(StoreError::SubscriptionNotFound(old_id))?;

        let pos = slot
            .iter()
            .position(|e| e.id == old_id)
            .ok_or(StoreError::SubscriptionNotFound(old_id))?;

        if slot
            .iter()
            .enumerate()
            .any(|(i, e)| i != pos && e.same_key(&entry))
        {
            return Err(StoreError::duplicate(&entry));
        }

        slot[pos] = entry;
        Ok(())
    }

    async fn delete(&self, token_id: TokenId, subscription_id: Uuid) -> Result<bool, StoreError> {
        let removed = match self.entries.get_mut(&token_id) {
            Some(mut slot) => {
                let before = slot.len();
                slot.retain(|e| e.id != subscription_id);
                slot.len() != before
            }
            None => false,
        };

        if removed {
            self.prune(token_id);
        }
        Ok(removed)
    }

    async fn delete_for_token(&self, token_id: TokenId) -> Result<usize, StoreError> {
        Ok(self
            .entries
            .remove(&token_id)
            .map(|(_, slot)| slot.len())
            .unwrap_or(0))
    }

    async fn lookup(
        &self,
        kind: OccurrenceKind,
        name: &str,
        token_id: TokenId,
    ) -> Result<Option<SubscriptionEntry>, StoreError> {
        Ok(self
            .entries
            .get(&token_id)
            .and_then(|slot| slot.iter().find(|e| e.matches(kind, name)).cloned()))
    }

    async fn entries_for(&self, token_id: TokenId) -> Result<Vec<SubscriptionEntry>, StoreError> {
        Ok(self
            .entries
            .get(&token_id)
            .map(|slot| slot.value().clone())
            .unwrap_or_default())
    }

    async fn find_by_occurrence(
        &self,
        kind: OccurrenceKind,
        name: &str,
    ) -> Result<Vec<SubscriptionEntry>, StoreError> {
        let mut found: Vec<SubscriptionEntry> = self
            .entries
            .iter()
            .flat_map(|slot| {
                slot.value()
                    .iter()
                    .filter(|e| e.matches(kind, name))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: OccurrenceKind, name: &str, token_id: TokenId) -> SubscriptionEntry {
        SubscriptionEntry::new(kind, name, token_id, None, false)
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();

        let e = entry(OccurrenceKind::Message, "orderApproved", token);
        store.insert(e.clone()).await.unwrap();

        let found = store
            .lookup(OccurrenceKind::Message, "orderApproved", token)
            .await
            .unwrap();
        assert_eq!(found, Some(e));

        // Same name, different kind is a different key
        let found = store
            .lookup(OccurrenceKind::Signal, "orderApproved", token)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();

        store
            .insert(entry(OccurrenceKind::Signal, "itemDone", token))
            .await
            .unwrap();

        let result = store
            .insert(entry(OccurrenceKind::Signal, "itemDone", token))
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert_eq!(store.len(), 1);

        // Another token may hold the same kind and name
        store
            .insert(entry(OccurrenceKind::Signal, "itemDone", TokenId::new()))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_returns_previous() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();

        let first = entry(OccurrenceKind::Message, "m", token);
        assert!(store.upsert(first.clone()).await.unwrap().is_none());

        let second = entry(OccurrenceKind::Message, "m", token);
        let previous = store.upsert(second.clone()).await.unwrap();
        assert_eq!(previous, Some(first));

        assert_eq!(store.entries_for(token).await.unwrap(), vec![second]);
    }

    #[tokio::test]
    async fn test_replace_swaps_in_place() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();

        let a = entry(OccurrenceKind::Signal, "a", token);
        let b = entry(OccurrenceKind::Signal, "b", token);
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();

        let fresh = a.renewed();
        store.replace(a.id, fresh.clone()).await.unwrap();

        let entries = store.entries_for(token).await.unwrap();
        assert_eq!(entries, vec![fresh, b]);
    }

    #[tokio::test]
    async fn test_replace_missing_entry() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();
        let stale = entry(OccurrenceKind::Signal, "a", token);

        let result = store.replace(stale.id, stale.renewed()).await;
        assert!(matches!(result, Err(StoreError::SubscriptionNotFound(id)) if id == stale.id));
    }

    #[tokio::test]
    async fn test_replace_cannot_collide_with_sibling_entry() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();

        let a = entry(OccurrenceKind::Signal, "a", token);
        let b = entry(OccurrenceKind::Signal, "b", token);
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();

        // Replacing `a` with an entry keyed like `b` would duplicate `b`
        let result = store.replace(a.id, b.renewed()).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        assert_eq!(store.entries_for(token).await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_delete_and_delete_for_token() {
        let store = InMemorySubscriptionStore::new();
        let token = TokenId::new();

        let a = entry(OccurrenceKind::Message, "a", token);
        let b = entry(OccurrenceKind::Signal, "b", token);
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();

        assert!(store.delete(token, a.id).await.unwrap());
        assert!(!store.delete(token, a.id).await.unwrap());
        assert_eq!(store.len(), 1);

        assert_eq!(store.delete_for_token(token).await.unwrap(), 1);
        assert_eq!(store.delete_for_token(token).await.unwrap(), 0);
        assert!(store.is_empty());
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_find_by_occurrence_across_tokens() {
        let store = InMemorySubscriptionStore::new();
        let tokens = [TokenId::new(), TokenId::new(), TokenId::new()];

        for token in tokens {
            store
                .insert(entry(OccurrenceKind::Signal, "itemDone", token))
                .await
                .unwrap();
        }
        store
            .insert(entry(OccurrenceKind::Message, "itemDone", tokens[0]))
            .await
            .unwrap();

        let found = store
            .find_by_occurrence(OccurrenceKind::Signal, "itemDone")
            .await
            .unwrap();
        assert_eq!(found.len(), 3);
        let mut owners: Vec<_> = found.iter().map(|e| e.token_id).collect();
        owners.sort();
        let mut expected = tokens.to_vec();
        expected.sort();
        assert_eq!(owners, expected);

        let none = store
            .find_by_occurrence(OccurrenceKind::Signal, "nothing")
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
