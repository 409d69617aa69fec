//! Normalizes raw backend records into [`Post`]s.

use std::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::warn;

use super::model::{Post, RawPost};
use crate::http::QueryError;

/// Newest first. Equal dates compare equal, so a stable sort keeps response order.
pub fn newest_first(a: &Post, b: &Post) -> Ordering {
    b.date.cmp(&a.date)
}

/// Decodes a list response body.
///
/// # Errors
///
/// Returns [`QueryError::DecodeError`] if `body` is not an array of post objects.
pub fn decode_posts(body: Value) -> Result<Vec<RawPost>, QueryError> {
    serde_json::from_value(body).map_err(|e| QueryError::DecodeError(e.to_string()))
}

/// Normalizes a list response.
///
/// Records without an id or a numeric author are dropped. The k-th kept
/// record without a usable date (counting from 1, in response order) is dated
/// `now - k minutes`, so undated posts keep their response order once sorted
/// newest first. Missing reactions count as zero.
pub fn transform_posts(records: Vec<RawPost>, now: DateTime<Utc>) -> Vec<Post> {
    let mut undated = 0;
    records
        .into_iter()
        .filter_map(|record| {
            normalize(record, || {
                undated += 1;
                now - TimeDelta::minutes(undated)
            })
            .inspect_err(|reason| warn!(%reason, "dropping post record"))
            .ok()
        })
        .collect()
}

/// Normalizes a single-record response, dating it `now` if it has no date.
///
/// # Errors
///
/// Returns [`QueryError::DecodeError`] if the body is not a post object or
/// lacks an id or author.
pub fn transform_post(body: Value, now: DateTime<Utc>) -> Result<Post, QueryError> {
    let record: RawPost =
        serde_json::from_value(body).map_err(|e| QueryError::DecodeError(e.to_string()))?;
    normalize(record, || now).map_err(|reason| QueryError::DecodeError(reason.to_string()))
}

fn normalize(
    record: RawPost,
    fallback_date: impl FnOnce() -> DateTime<Utc>,
) -> Result<Post, &'static str> {
    let user_id = record.user_id();
    let date = record.date();
    let RawPost {
        id,
        title,
        body,
        reactions,
        ..
    } = record;
    let id = id.ok_or("record has no id")?;
    let user_id = user_id.ok_or("record has no numeric userId")?;

    Ok(Post {
        id,
        user_id,
        title: title.unwrap_or_default(),
        body: body.unwrap_or_default(),
        // Only records that are kept consume a synthetic date
        date: date.unwrap_or_else(fallback_date),
        reactions: reactions.unwrap_or_default(),
    })
}
