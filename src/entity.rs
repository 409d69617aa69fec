//! Normalized entity storage.
//!
//! An [`EntityState`] keeps one copy of every entity, keyed by id, next to
//! the id sequence that gives the collection its order. An [`EntityAdapter`]
//! carries the ordering rule and performs every change, so the two halves
//! never disagree.
//!
//! # Example
//!
//! ```
//! use postcache::entity::{Entity, EntityAdapter};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Note {
//!     id: u32,
//!     rank: u32,
//! }
//!
//! impl Entity for Note {
//!     type Id = u32;
//!
//!     fn id(&self) -> &u32 {
//!         &self.id
//!     }
//! }
//!
//! let adapter = EntityAdapter::sorted(|a: &Note, b: &Note| a.rank.cmp(&b.rank));
//! let mut state = adapter.initial_state();
//! adapter.set_all(&mut state, [Note { id: 1, rank: 9 }, Note { id: 2, rank: 3 }]);
//! assert_eq!(state.ids(), &[2, 1]);
//!
//! adapter.update_one(&mut state, &2, |note| note.rank = 10);
//! assert_eq!(state.ids(), &[1, 2]);
//! ```

pub mod selectors;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

pub use selectors::EntitySelectors;

/// A value with a stable identity.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;
}

/// Orders two entities; `Less` means `a` comes first.
pub type SortComparer<T> = fn(&T, &T) -> Ordering;

/// A keyed collection plus its ordered id sequence.
///
/// Both halves live behind `Arc`s. Any change made through an
/// [`EntityAdapter`] swaps in new allocations while older snapshots are
/// still shared, so [`EntityState::same_as`] detects change without comparing
/// contents.
#[derive(Debug, Clone)]
pub struct EntityState<T: Entity> {
    ids: Arc<Vec<T::Id>>,
    entities: Arc<HashMap<T::Id, T>>,
}

impl<T: Entity> EntityState<T> {
    /// An empty collection.
    pub fn new() -> Self {
        Self {
            ids: Arc::new(Vec::new()),
            entities: Arc::new(HashMap::new()),
        }
    }

    /// Ids in collection order.
    pub fn ids(&self) -> &[T::Id] {
        &self.ids
    }

    /// The id → entity mapping.
    pub fn entities(&self) -> &HashMap<T::Id, T> {
        &self.entities
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Entities in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.ids.iter().filter_map(|id| self.entities.get(id))
    }

    /// Returns `true` if both states share the same allocations, i.e. neither
    /// was changed since one was cloned from the other.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ids, &other.ids) && Arc::ptr_eq(&self.entities, &other.entities)
    }
}

impl<T: Entity> Default for EntityState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity + PartialEq> PartialEq for EntityState<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids && self.entities == other.entities
    }
}

/// Performs every change to an [`EntityState`], keeping ids ordered.
///
/// Without a comparer, ids keep insertion order. With one, ids are sorted by
/// it and entities that compare equal keep their relative input order.
pub struct EntityAdapter<T> {
    sort_comparer: Option<SortComparer<T>>,
}

impl<T: Entity> EntityAdapter<T> {
    /// An adapter that keeps insertion order.
    pub const fn new() -> Self {
        Self {
            sort_comparer: None,
        }
    }

    /// An adapter that keeps ids sorted by `comparer`.
    pub const fn sorted(comparer: SortComparer<T>) -> Self {
        Self {
            sort_comparer: Some(comparer),
        }
    }

    pub fn initial_state(&self) -> EntityState<T> {
        EntityState::new()
    }

    /// Replaces the whole collection.
    ///
    /// When `entities` holds the same id twice, the first occurrence wins.
    pub fn set_all(&self, state: &mut EntityState<T>, entities: impl IntoIterator<Item = T>) {
        let mut seen = HashSet::new();
        let mut unique: Vec<T> = entities
            .into_iter()
            .filter(|entity| seen.insert(entity.id().clone()))
            .collect();
        if let Some(compare) = self.sort_comparer {
            unique.sort_by(compare);
        }

        let ids = unique.iter().map(|entity| entity.id().clone()).collect();
        let entities = unique
            .into_iter()
            .map(|entity| (entity.id().clone(), entity))
            .collect();
        state.ids = Arc::new(ids);
        state.entities = Arc::new(entities);
    }

    /// Inserts `entity` unless its id is already present. Returns whether it was inserted.
    pub fn add_one(&self, state: &mut EntityState<T>, entity: T) -> bool {
        if state.contains(entity.id()) {
            return false;
        }
        self.insert_new(state, entity);
        true
    }

    /// Inserts `entity`, replacing any entity with the same id.
    pub fn upsert_one(&self, state: &mut EntityState<T>, entity: T) {
        if !state.contains(entity.id()) {
            self.insert_new(state, entity);
            return;
        }
        let id = entity.id().clone();
        Arc::make_mut(&mut state.entities).insert(id.clone(), entity);
        self.reposition(state, &id);
    }

    /// Changes the entity with `id` in place. Returns `false` (and does
    /// nothing) when no such entity exists.
    ///
    /// `change` must not alter the entity's id.
    pub fn update_one(
        &self,
        state: &mut EntityState<T>,
        id: &T::Id,
        change: impl FnOnce(&mut T),
    ) -> bool {
        if !state.contains(id) {
            return false;
        }
        if let Some(entity) = Arc::make_mut(&mut state.entities).get_mut(id) {
            change(entity);
        }
        self.reposition(state, id);
        true
    }

    /// Removes and returns the entity with `id`.
    pub fn remove_one(&self, state: &mut EntityState<T>, id: &T::Id) -> Option<T> {
        if !state.contains(id) {
            return None;
        }
        let removed = Arc::make_mut(&mut state.entities).remove(id);
        Arc::make_mut(&mut state.ids).retain(|other| other != id);
        removed
    }

    pub fn remove_all(&self, state: &mut EntityState<T>) {
        state.ids = Arc::new(Vec::new());
        state.entities = Arc::new(HashMap::new());
    }

    fn insert_new(&self, state: &mut EntityState<T>, entity: T) {
        let id = entity.id().clone();
        let at = match self.sort_comparer {
            Some(compare) => state.ids.partition_point(|other| {
                state
                    .entities
                    .get(other)
                    .is_some_and(|other| compare(other, &entity) != Ordering::Greater)
            }),
            None => state.ids.len(),
        };
        Arc::make_mut(&mut state.ids).insert(at, id.clone());
        Arc::make_mut(&mut state.entities).insert(id, entity);
    }

    /// Moves `id` to where the comparer says it belongs, if it is out of place.
    fn reposition(&self, state: &mut EntityState<T>, id: &T::Id) {
        let Some(compare) = self.sort_comparer else {
            return;
        };
        let entities = &*state.entities;
        let Some(entity) = entities.get(id) else {
            return;
        };
        let Some(index) = state.ids.iter().position(|other| other == id) else {
            return;
        };

        let in_order = |a: Option<&T::Id>, b: Option<&T::Id>| match (a, b) {
            (Some(a), Some(b)) => match (entities.get(a), entities.get(b)) {
                (Some(a), Some(b)) => compare(a, b) != Ordering::Greater,
                _ => true,
            },
            _ => true,
        };
        let before = index.checked_sub(1).and_then(|i| state.ids.get(i));
        let after = state.ids.get(index + 1);
        if in_order(before, Some(id)) && in_order(Some(id), after) {
            return;
        }

        let ids = Arc::make_mut(&mut state.ids);
        ids.remove(index);
        let at = ids.partition_point(|other| {
            entities
                .get(other)
                .is_some_and(|other| compare(other, entity) != Ordering::Greater)
        });
        ids.insert(at, id.clone());
    }
}

impl<T> Clone for EntityAdapter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EntityAdapter<T> {}

impl<T: Entity> Default for EntityAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EntityAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter")
            .field("sorted", &self.sort_comparer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        rank: i32,
    }

    impl Entity for Item {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    fn item(id: u32, rank: i32) -> Item {
        Item { id, rank }
    }

    fn by_rank_desc() -> EntityAdapter<Item> {
        EntityAdapter::sorted(|a, b| b.rank.cmp(&a.rank))
    }

    #[test]
    fn test_set_all_sorts_and_keeps_first_duplicate() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 1), item(2, 5), item(1, 9), item(3, 3)]);

        assert_eq!(state.ids(), &[2, 3, 1]);
        assert_eq!(state.get(&1), Some(&item(1, 1)));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_set_all_ties_keep_input_order() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(4, 0), item(2, 0), item(9, 0)]);
        assert_eq!(state.ids(), &[4, 2, 9]);
    }

    #[test]
    fn test_unsorted_adapter_keeps_insertion_order() {
        let adapter = EntityAdapter::new();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(3, 0), item(1, 0)]);
        assert!(adapter.add_one(&mut state, item(2, 0)));
        assert!(!adapter.add_one(&mut state, item(3, 7)));
        assert_eq!(state.ids(), &[3, 1, 2]);
        assert_eq!(state.get(&3).map(|i| i.rank), Some(0));
    }

    #[test]
    fn test_add_one_inserts_in_sorted_position() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 10), item(2, 5), item(3, 1)]);

        adapter.add_one(&mut state, item(4, 5));
        assert_eq!(state.ids(), &[1, 2, 4, 3]);
    }

    #[test]
    fn test_update_one_repositions_only_when_needed() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 10), item(2, 5), item(3, 1)]);

        assert!(adapter.update_one(&mut state, &2, |i| i.rank = 6));
        assert_eq!(state.ids(), &[1, 2, 3]);

        assert!(adapter.update_one(&mut state, &3, |i| i.rank = 20));
        assert_eq!(state.ids(), &[3, 1, 2]);
        assert_eq!(state.get(&3).map(|i| i.rank), Some(20));
    }

    #[test]
    fn test_update_missing_is_noop() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 1)]);
        let before = state.clone();

        assert!(!adapter.update_one(&mut state, &7, |i| i.rank = 100));
        assert!(state.same_as(&before));
    }

    #[test]
    fn test_upsert_replaces_and_repositions() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 10), item(2, 5)]);

        adapter.upsert_one(&mut state, item(1, 0));
        assert_eq!(state.ids(), &[2, 1]);

        adapter.upsert_one(&mut state, item(3, 7));
        assert_eq!(state.ids(), &[3, 2, 1]);
    }

    #[test]
    fn test_remove() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 10), item(2, 5)]);

        assert_eq!(adapter.remove_one(&mut state, &1), Some(item(1, 10)));
        assert_eq!(adapter.remove_one(&mut state, &1), None);
        assert_eq!(state.ids(), &[2]);

        adapter.remove_all(&mut state);
        assert!(state.is_empty());
        assert!(!state.contains(&2));
    }

    #[test]
    fn test_changes_detach_from_shared_snapshots() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 10), item(2, 5)]);
        let snapshot = state.clone();
        assert!(state.same_as(&snapshot));

        adapter.update_one(&mut state, &2, |i| i.rank = 50);
        assert!(!state.same_as(&snapshot));
        assert_eq!(snapshot.ids(), &[1, 2]);
        assert_eq!(snapshot.get(&2).map(|i| i.rank), Some(5));
    }

    #[test]
    fn test_iter_follows_id_order() {
        let adapter = by_rank_desc();
        let mut state = adapter.initial_state();
        adapter.set_all(&mut state, [item(1, 1), item(2, 2)]);
        let ranks: Vec<i32> = state.iter().map(|i| i.rank).collect();
        assert_eq!(ranks, vec![2, 1]);
    }
}
