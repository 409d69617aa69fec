// Integration tests for the posts endpoints against the in-memory backend

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::{FutureExt, StreamExt};
use postcache::http::{Method, QueryStatus};
use postcache::prelude::*;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};

fn fixed_now() -> DateTime<Utc> {
    "2024-06-01T12:00:00Z".parse().unwrap()
}

fn api_over(backend: &MockBackend) -> PostsApi {
    PostsApi::new(Arc::new(QueryClient::new()), backend.clone()).with_clock(fixed_now)
}

fn dated(id: u64, user_id: u64, date: &str) -> Value {
    json!({"id": id, "userId": user_id, "title": format!("post {id}"), "body": "", "date": date})
}

/// Waits for the next successful query result, skipping `Loading`.
async fn next_data(rx: &mut mpsc::UnboundedReceiver<QueryResult<EntityState<Post>>>) -> EntityState<Post> {
    loop {
        let result = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("query should emit within timeout")
            .expect("subscription should still be running");
        match result.state {
            QueryState::Success { data, .. } => return data,
            QueryState::Loading => continue,
            QueryState::Error(e) => panic!("query failed: {e}"),
        }
    }
}

#[tokio::test]
async fn test_undated_posts_get_synthetic_dates() {
    let backend = MockBackend::with_posts(vec![
        json!({"id": 1, "userId": 1, "title": "a", "body": ""}),
        json!({"id": 2, "userId": 1, "title": "b", "body": ""}),
    ]);
    let api = api_over(&backend);

    let state = api.get_posts().await.unwrap();
    let selectors = EntitySelectors::new();

    let first = selectors.select_by_id(&state, &PostId::Number(1)).unwrap();
    let second = selectors.select_by_id(&state, &PostId::Number(2)).unwrap();
    assert_eq!(first.reactions, Reactions::default());
    assert_eq!(second.reactions, Reactions::default());
    assert_eq!(first.date - second.date, TimeDelta::minutes(1));
    assert_eq!(
        *selectors.select_ids(&state),
        vec![PostId::Number(1), PostId::Number(2)]
    );
}

#[tokio::test]
async fn test_concurrent_list_queries_share_one_request() {
    let backend = MockBackend::with_posts(vec![dated(1, 1, "2024-01-01T00:00:00Z")])
        .with_latency(Duration::from_millis(20));
    let api = api_over(&backend);

    let (a, b) = tokio::join!(api.get_posts(), api.get_posts());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(backend.request_count(Method::Get), 1);

    // Fresh cache: no further request
    api.get_posts().await.unwrap();
    assert_eq!(backend.request_count(Method::Get), 1);
}

#[tokio::test]
async fn test_reaction_shows_immediately_and_rolls_back_on_failure() {
    let backend = MockBackend::with_posts(vec![dated(1, 1, "2024-01-01T00:00:00Z")])
        .with_latency(Duration::from_millis(50));
    let api = api_over(&backend);
    api.get_posts().await.unwrap();

    backend.fail_next(Method::Patch, QueryError::NetworkError("offline".to_string()));
    let thumbs_up = Reactions {
        thumbs_up: 1,
        ..Reactions::default()
    };
    let pending = tokio::spawn({
        let api = api.clone();
        async move { api.add_reaction(PostId::Number(1), thumbs_up).await }
    });

    // Visible before the server answers
    sleep(Duration::from_millis(10)).await;
    let shown = api.posts_state();
    assert_eq!(shown.get(&PostId::Number(1)).unwrap().reactions, thumbs_up);

    let result = pending.await.unwrap();
    assert_eq!(result, Err(QueryError::NetworkError("offline".to_string())));

    let restored = api.posts_state();
    assert_eq!(
        restored.get(&PostId::Number(1)).unwrap().reactions,
        Reactions::default()
    );
    // Reactions never invalidate
    assert!(!api.client().is_stale(&PostsApi::posts_key()));
    assert_eq!(backend.request_count(Method::Get), 1);
}

#[tokio::test]
async fn test_successful_reaction_keeps_patch() {
    let backend = MockBackend::with_posts(vec![dated(1, 1, "2024-01-01T00:00:00Z")]);
    let api = api_over(&backend);
    api.get_posts().await.unwrap();

    let sent = api.react(PostId::Number(1), ReactionKind::Coffee).await.unwrap();
    assert_eq!(sent.coffee, 1);
    assert_eq!(
        api.posts_state().get(&PostId::Number(1)).unwrap().reactions.coffee,
        1
    );
    assert_eq!(backend.posts()[0]["reactions"]["coffee"], json!(1));
}

#[tokio::test]
async fn test_added_post_appears_in_subscribed_list() {
    let backend = MockBackend::with_posts(vec![dated(1, 1, "2024-01-01T00:00:00Z")]);
    // Real clock: the new post is newer than the seeded one
    let api = PostsApi::new(Arc::new(QueryClient::new()), backend.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = SubscriptionManager::new(tx);
    manager.update(vec![Subscription::new(api.posts_query())]);

    let initial = next_data(&mut rx).await;
    assert_eq!(initial.ids(), &[PostId::Number(1)]);
    assert_eq!(api.client().subscriber_count(&PostsApi::posts_key()), 1);

    let created = api
        .add_post(NewPost::from_form("Fresh", "news", "2").unwrap())
        .await
        .unwrap();

    let refreshed = next_data(&mut rx).await;
    let selectors = EntitySelectors::new();
    assert_eq!(
        *selectors.select_ids(&refreshed),
        vec![created.id.clone(), PostId::Number(1)]
    );
    assert_eq!(backend.request_count(Method::Get), 2);

    manager.shutdown().await;
    assert_eq!(api.client().subscriber_count(&PostsApi::posts_key()), 0);
}

#[tokio::test]
async fn test_update_and_delete_invalidate_by_id() {
    let backend = MockBackend::with_posts(vec![
        dated(1, 1, "2024-01-02T00:00:00Z"),
        dated(2, 2, "2024-01-01T00:00:00Z"),
    ]);
    let api = api_over(&backend);
    let all_key = PostsApi::posts_key();
    let mine_key = PostsApi::posts_by_user_key(1);
    api.get_posts().await.unwrap();
    api.get_posts_by_user(1).await.unwrap();

    // Post 2 is only in the full list
    let post = api.posts_state().get(&PostId::Number(2)).unwrap().clone();
    let updated = api
        .update_post(Post {
            title: "edited".to_string(),
            ..post
        })
        .await
        .unwrap();
    assert_eq!(updated.title, "edited");
    assert_eq!(updated.date, fixed_now());
    assert!(api.client().is_stale(&all_key));
    assert!(!api.client().is_stale(&mine_key));

    let refetched = api.get_posts().await.unwrap();
    assert_eq!(refetched.get(&PostId::Number(2)).unwrap().title, "edited");
    assert_eq!(refetched.ids(), &[PostId::Number(2), PostId::Number(1)]);

    // Post 1 is in both
    api.delete_post(PostId::Number(1)).await.unwrap();
    assert!(api.client().is_stale(&all_key));
    assert!(api.client().is_stale(&mine_key));
    assert!(api.get_posts_by_user(1).await.unwrap().is_empty());

    let delete = backend
        .requests()
        .into_iter()
        .find(|r| r.method == Method::Delete)
        .unwrap();
    assert_eq!(delete.path, "/posts/1");
    assert_eq!(delete.body, Some(json!({"id": 1})));
}

#[tokio::test]
async fn test_missing_post_mutations_fail_without_invalidating() {
    let backend = MockBackend::with_posts(vec![dated(1, 1, "2024-01-01T00:00:00Z")]);
    let api = api_over(&backend);
    api.get_posts().await.unwrap();

    let result = api.delete_post(PostId::Number(99)).await;
    assert_eq!(result, Err(QueryError::NotFound("/posts/99".to_string())));
    assert!(!api.client().is_stale(&PostsApi::posts_key()));
}

#[tokio::test]
async fn test_failed_list_fetch_is_stored_then_retried() {
    let backend = MockBackend::with_posts(vec![dated(1, 1, "2024-01-01T00:00:00Z")]);
    let api = api_over(&backend);
    backend.fail_next(Method::Get, QueryError::FetchError("GET /posts: 500".to_string()));

    assert!(api.get_posts().await.is_err());
    assert_eq!(api.client().status(&PostsApi::posts_key()), QueryStatus::Error);
    assert!(api.posts_state().is_empty());

    assert_eq!(api.get_posts().await.unwrap().len(), 1);
    assert_eq!(api.client().status(&PostsApi::posts_key()), QueryStatus::Success);
    assert_eq!(api.client().error(&PostsApi::posts_key()), None);
}

#[tokio::test]
async fn test_mutation_command_runs_add_post() {
    let backend = MockBackend::new();
    let api = api_over(&backend);

    let cmd = Mutation::mutate(NewPost::new("Via command", "", 3), {
        let api = api.clone();
        move |draft| async move { api.add_post(draft).await }.boxed()
    });
    let results: Vec<_> = cmd.into_stream().collect().await;

    let [Ok(post)] = results.as_slice() else {
        panic!("expected one successful result, got {results:?}");
    };
    assert_eq!(post.user_id, 3);
    assert_eq!(backend.posts().len(), 1);
}
