//! Posts feed example demonstrating queries, mutations and optimistic reactions.
//!
//! This example shows:
//! - A query subscription that keeps the feed in sync with the cache
//! - Adding a post, which invalidates the list and triggers a refetch
//! - An optimistic reaction that is shown before the server answers
//! - Both mutations batched into one command
//!
//! By default it runs against the in-memory backend. Point it at a
//! json-server instance (`npx json-server --port 3500 db.json`) with
//! `POSTCACHE_API_URL=http://localhost:3500`.
//!
//! Run with: `RUST_LOG=postcache=debug cargo run --example posts_feed`

use std::sync::Arc;

use color_eyre::eyre::Result;
use futures::{FutureExt, StreamExt};
use postcache::prelude::*;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Messages that the application can receive
#[derive(Debug)]
enum Message {
    /// Query result for the feed
    Feed(QueryResult<EntityState<Post>>),
    /// Create post result
    PostAdded(Result<Post, QueryError>),
    /// Reaction result
    Reacted(Result<Reactions, QueryError>),
}

/// Application state
struct App {
    api: PostsApi,
    selectors: EntitySelectors<Post>,
    feed: QueryState<EntityState<Post>>,
    posted: bool,
    /// Mutations still waiting for an answer.
    pending: usize,
    done: bool,
}

impl App {
    fn new(api: PostsApi) -> Self {
        Self {
            api,
            selectors: EntitySelectors::new(),
            feed: QueryState::Loading,
            posted: false,
            pending: 0,
            done: false,
        }
    }

    fn update(&mut self, msg: Message) -> Command<Message> {
        match msg {
            Message::Feed(result) => {
                self.feed = result.state;
                self.render();
                if self.posted || !matches!(self.feed, QueryState::Success { .. }) {
                    return Command::none();
                }
                self.posted = true;
                self.mutations()
            }
            Message::PostAdded(result) => {
                match result {
                    Ok(post) => info!(id = %post.id, "post added"),
                    Err(e) => info!(error = %e, "could not add post"),
                }
                self.settled()
            }
            Message::Reacted(result) => {
                match result {
                    Ok(reactions) => info!(total = reactions.total(), "reaction saved"),
                    Err(e) => info!(error = %e, "reaction rolled back"),
                }
                self.render();
                self.settled()
            }
        }
    }

    /// Adds a post and reacts to the newest cached one, concurrently.
    fn mutations(&mut self) -> Command<Message> {
        let api = self.api.clone();
        let add = Mutation::mutate(NewPost::new("Hello from Rust", "Posted by the demo", 1), move |draft| {
            async move { api.add_post(draft).await }.boxed()
        })
        .map(Message::PostAdded);

        let newest = self.selectors.select_all(&self.api.posts_state()).first().map(|post| post.id.clone());
        let react = newest.map_or_else(Command::none, |id| {
            let api = self.api.clone();
            Command::perform(async move { api.react(id, ReactionKind::Rocket).await }, Message::Reacted)
        });

        let commands = [add, react];
        self.pending = commands.iter().filter(|cmd| !cmd.is_none()).count();
        Command::batch(commands)
    }

    fn settled(&mut self) -> Command<Message> {
        self.pending = self.pending.saturating_sub(1);
        self.done = self.pending == 0;
        Command::none()
    }

    fn subscriptions(&self) -> Vec<Subscription<Message>> {
        vec![Subscription::new(self.api.posts_query()).map(Message::Feed)]
    }

    fn render(&self) {
        match &self.feed {
            QueryState::Loading => println!("Loading..."),
            QueryState::Error(e) => println!("Error: {e}"),
            QueryState::Success { .. } => {
                // The cache also reflects optimistic patches made since the last emission
                let posts = self.selectors.select_all(&self.api.posts_state());
                println!("--- {} posts ---", posts.len());
                for post in posts.iter() {
                    println!(
                        "[{}] {} (user {}, {}) rockets: {}",
                        post.id,
                        post.title,
                        post.user_id,
                        post.date.format("%Y-%m-%d %H:%M"),
                        post.reactions.rocket
                    );
                }
            }
        }
    }
}

fn build_api() -> Result<PostsApi> {
    let client = Arc::new(QueryClient::new());
    if std::env::var_os("POSTCACHE_API_URL").is_some() {
        let config = ApiConfig::from_env()?;
        info!(base_url = %config.base_url, "using HTTP backend");
        return Ok(PostsApi::connect(client, config)?);
    }

    info!("using in-memory backend");
    let backend = MockBackend::with_posts(vec![
        json!({"id": 1, "userId": 1, "title": "First post", "body": "Hi", "date": "2024-01-01T09:00:00Z"}),
        json!({"id": 2, "userId": "2", "title": "Undated post", "body": "No date on the server"}),
    ]);
    Ok(PostsApi::new(client, backend))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut app = App::new(build_api()?);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriptions = SubscriptionManager::new(tx.clone());
    subscriptions.update(app.subscriptions());

    while let Some(msg) = rx.recv().await {
        let mut messages = app.update(msg).into_stream();
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.next().await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });
        if app.done {
            break;
        }
    }

    subscriptions.shutdown().await;
    Ok(())
}
