//! Memoized reads over an [`EntityState`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Entity, EntityState};

struct Memo<T: Entity> {
    ids: Arc<Vec<T::Id>>,
    entities: Arc<HashMap<T::Id, T>>,
    all: Arc<Vec<T>>,
}

/// Derives views from an [`EntityState`], recomputing `select_all` only
/// when the state it is given has changed.
pub struct EntitySelectors<T: Entity> {
    memo: Mutex<Option<Memo<T>>>,
}

impl<T: Entity> EntitySelectors<T> {
    pub fn new() -> Self {
        Self {
            memo: Mutex::new(None),
        }
    }

    /// Every entity, in the state's order.
    ///
    /// Called again with an unchanged state, returns the same `Arc`.
    pub fn select_all(&self, state: &EntityState<T>) -> Arc<Vec<T>> {
        let mut memo = self.memo.lock();
        if let Some(memo) = memo.as_ref()
            && Arc::ptr_eq(&memo.ids, &state.ids)
            && Arc::ptr_eq(&memo.entities, &state.entities)
        {
            return memo.all.clone();
        }

        let all = Arc::new(state.iter().cloned().collect::<Vec<_>>());
        *memo = Some(Memo {
            ids: state.ids.clone(),
            entities: state.entities.clone(),
            all: all.clone(),
        });
        all
    }

    /// The ordered ids; the same `Arc` for as long as the ids are unchanged.
    pub fn select_ids(&self, state: &EntityState<T>) -> Arc<Vec<T::Id>> {
        state.ids.clone()
    }

    pub fn select_by_id<'a>(&self, state: &'a EntityState<T>, id: &T::Id) -> Option<&'a T> {
        state.get(id)
    }

    pub fn select_total(&self, state: &EntityState<T>) -> usize {
        state.len()
    }
}

impl<T: Entity> Default for EntitySelectors<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> fmt::Debug for EntitySelectors<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySelectors")
            .field("memoized", &self.memo.lock().is_some())
            .finish()
    }
}
