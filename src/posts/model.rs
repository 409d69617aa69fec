use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;
use crate::http::QueryError;

/// A post id as the backend sends it: json-server ids may be numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostId {
    Number(u64),
    Text(String),
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for PostId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for PostId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

/// The reactions a reader can leave on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionKind {
    ThumbsUp,
    Wow,
    Heart,
    Rocket,
    Coffee,
}

impl ReactionKind {
    pub const ALL: [Self; 5] = [
        Self::ThumbsUp,
        Self::Wow,
        Self::Heart,
        Self::Rocket,
        Self::Coffee,
    ];

    /// The field name used on the wire.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbsUp",
            Self::Wow => "wow",
            Self::Heart => "heart",
            Self::Rocket => "rocket",
            Self::Coffee => "coffee",
        }
    }
}

/// Reaction counts. Kinds missing from a response count as zero and unknown kinds are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reactions {
    pub thumbs_up: u32,
    pub wow: u32,
    pub heart: u32,
    pub rocket: u32,
    pub coffee: u32,
}

impl Reactions {
    pub const fn get(&self, kind: ReactionKind) -> u32 {
        match kind {
            ReactionKind::ThumbsUp => self.thumbs_up,
            ReactionKind::Wow => self.wow,
            ReactionKind::Heart => self.heart,
            ReactionKind::Rocket => self.rocket,
            ReactionKind::Coffee => self.coffee,
        }
    }

    /// A copy with one more `kind` reaction.
    #[must_use]
    pub const fn incremented(mut self, kind: ReactionKind) -> Self {
        let count = match kind {
            ReactionKind::ThumbsUp => &mut self.thumbs_up,
            ReactionKind::Wow => &mut self.wow,
            ReactionKind::Heart => &mut self.heart,
            ReactionKind::Rocket => &mut self.rocket,
            ReactionKind::Coffee => &mut self.coffee,
        };
        *count = count.saturating_add(1);
        self
    }

    pub fn total(&self) -> u32 {
        ReactionKind::ALL.iter().map(|kind| self.get(*kind)).sum()
    }
}

/// A normalized post: every field present, `date` always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub user_id: u64,
    pub title: String,
    pub body: String,
    pub date: DateTime<Utc>,
    pub reactions: Reactions,
}

impl Entity for Post {
    type Id = PostId;

    fn id(&self) -> &PostId {
        &self.id
    }
}

/// A post record exactly as the backend returned it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPost {
    #[serde(default)]
    pub id: Option<PostId>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(default)]
    pub reactions: Option<Reactions>,
}

impl RawPost {
    /// The author id, accepting numeric strings such as `"3"`.
    pub fn user_id(&self) -> Option<u64> {
        match self.user_id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The timestamp, if present and valid RFC 3339.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        let Value::String(text) = self.date.as_ref()? else {
            return None;
        };
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|date| date.with_timezone(&Utc))
    }
}

/// A post to create. The server assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub title: String,
    pub body: String,
    pub user_id: u64,
}

impl NewPost {
    pub fn new(title: impl Into<String>, body: impl Into<String>, user_id: u64) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            user_id,
        }
    }

    /// Builds a post from form input, where the author is picked as text.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] if `user_id` is not a number.
    pub fn from_form(title: &str, body: &str, user_id: &str) -> Result<Self, QueryError> {
        let user_id = user_id
            .trim()
            .parse::<u64>()
            .map_err(|_| QueryError::InvalidInput(format!("user id {user_id:?} is not a number")))?;
        Ok(Self::new(title, body, user_id))
    }
}
