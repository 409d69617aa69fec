//! Invalidation tags and the tag → cache key graph.
//!
//! Queries *provide* tags for the data they cached; mutations *invalidate*
//! tags. [`TagIndex`] records which cache keys currently carry which tags so
//! that one invalidation sweep can find every affected entry.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;

use super::cache::CacheKey;

/// The entity family a tag refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Post,
    User,
}

/// Which member of a family a tag refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagId {
    /// The collection as a whole (additions show up here).
    List,
    /// A single entity.
    Id(String),
}

/// A label associating cached data with an invalidation group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub kind: TagKind,
    pub id: TagId,
}

impl Tag {
    /// The `{kind, LIST}` tag.
    #[must_use]
    pub const fn list(kind: TagKind) -> Self {
        Self {
            kind,
            id: TagId::List,
        }
    }

    /// The `{kind, id}` tag for a single entity.
    pub fn id(kind: TagKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: TagId::Id(id.to_string()),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            TagId::List => write!(f, "{:?}:LIST", self.kind),
            TagId::Id(id) => write!(f, "{:?}:{id}", self.kind),
        }
    }
}

/// Bidirectional index between tags and the cache keys that provide them.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    by_tag: DashMap<Tag, HashSet<CacheKey>>,
    by_key: DashMap<CacheKey, Vec<Tag>>,
}

impl TagIndex {
    /// Replaces the tags provided by `key`.
    pub(crate) fn retag(&self, key: &CacheKey, tags: Vec<Tag>) {
        self.unlink(key);
        for tag in &tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.by_key.insert(key.clone(), tags);
    }

    /// Removes every association of `key`.
    pub(crate) fn unlink(&self, key: &CacheKey) {
        let Some((_, old)) = self.by_key.remove(key) else {
            return;
        };
        for tag in old {
            let now_empty = self.by_tag.get_mut(&tag).is_some_and(|mut keys| {
                keys.remove(key);
                keys.is_empty()
            });
            if now_empty {
                self.by_tag.remove_if(&tag, |_, keys| keys.is_empty());
            }
        }
    }

    /// Every key carrying at least one of `tags`, without duplicates.
    pub(crate) fn keys_for(&self, tags: &[Tag]) -> Vec<CacheKey> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for tag in tags {
            if let Some(found) = self.by_tag.get(tag) {
                for key in found.iter() {
                    if seen.insert(key.clone()) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys
    }

    /// Tags currently provided by `key`.
    pub(crate) fn tags_of(&self, key: &CacheKey) -> Vec<Tag> {
        self.by_key
            .get(key)
            .map(|tags| tags.clone())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&self) {
        self.by_tag.clear();
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(endpoint: &'static str) -> CacheKey {
        CacheKey::new(endpoint, &())
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::list(TagKind::Post).to_string(), "Post:LIST");
        assert_eq!(Tag::id(TagKind::Post, 7).to_string(), "Post:7");
    }

    #[test]
    fn test_keys_for_matches_any_tag() {
        let index = TagIndex::default();
        index.retag(
            &key("getPosts"),
            vec![Tag::list(TagKind::Post), Tag::id(TagKind::Post, 1)],
        );
        index.retag(&key("getPostsByUserId"), vec![Tag::id(TagKind::Post, 1)]);

        let list = index.keys_for(&[Tag::list(TagKind::Post)]);
        assert_eq!(list, vec![key("getPosts")]);

        let mut by_id = index.keys_for(&[Tag::id(TagKind::Post, 1), Tag::list(TagKind::Post)]);
        by_id.sort_by(|a, b| a.endpoint.cmp(b.endpoint));
        assert_eq!(by_id, vec![key("getPosts"), key("getPostsByUserId")]);
    }

    #[test]
    fn test_retag_drops_old_associations() {
        let index = TagIndex::default();
        index.retag(&key("getPosts"), vec![Tag::id(TagKind::Post, 1)]);
        index.retag(&key("getPosts"), vec![Tag::id(TagKind::Post, 2)]);

        assert!(index.keys_for(&[Tag::id(TagKind::Post, 1)]).is_empty());
        assert_eq!(
            index.keys_for(&[Tag::id(TagKind::Post, 2)]),
            vec![key("getPosts")]
        );
        assert_eq!(index.tags_of(&key("getPosts")), vec![Tag::id(TagKind::Post, 2)]);
    }

    #[test]
    fn test_unlink_unknown_key_is_noop() {
        let index = TagIndex::default();
        index.unlink(&key("nothing"));
        assert!(index.keys_for(&[Tag::list(TagKind::User)]).is_empty());
    }
}
