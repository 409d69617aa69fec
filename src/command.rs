use futures::{
    FutureExt, StreamExt,
    stream::{self, BoxStream, select_all},
};

/// A command that can be executed to perform side effects.
///
/// Commands represent asynchronous operations that produce messages. They are
/// how mutations and cache invalidations are handed to whatever drives the
/// application loop:
/// - Running a mutation against the backend
/// - Invalidating cache tags after a mutation succeeded
/// - Batching several of the above
///
/// A command does nothing until its stream is consumed, see [`Command::into_stream`].
///
/// # Examples
///
/// ```
/// use postcache::command::Command;
///
/// enum Message {
///     GotResult(i32),
/// }
///
/// // Create a command that performs an async operation
/// let cmd = Command::perform(
///     async { 42 },
///     |result| Message::GotResult(result)
/// );
/// ```
pub struct Command<Msg: Send + 'static> {
    pub(crate) stream: Option<BoxStream<'static, Msg>>,
}

impl<Msg: Send + 'static> Command<Msg> {
    /// Create a command that does nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use postcache::command::Command;
    ///
    /// let cmd: Command<i32> = Command::none();
    /// assert!(cmd.is_none());
    /// ```
    #[must_use]
    pub fn none() -> Self {
        Self { stream: None }
    }

    /// Perform an asynchronous operation and convert its result to a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use postcache::command::Command;
    ///
    /// async fn fetch_data() -> String {
    ///     "data".to_string()
    /// }
    ///
    /// enum Message {
    ///     DataReceived(String),
    /// }
    ///
    /// let cmd = Command::perform(fetch_data(), Message::DataReceived);
    /// ```
    pub fn perform<A>(
        future: impl Future<Output = A> + Send + 'static,
        f: impl FnOnce(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::future(future.map(f))
    }

    /// Create a command from a future that produces a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use postcache::command::Command;
    ///
    /// let cmd = Command::future(async { 42 });
    /// ```
    pub fn future(future: impl Future<Output = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(future.into_stream().boxed()),
        }
    }

    /// Create a command that runs a side effect and produces no message.
    ///
    /// Cache invalidation is expressed this way: the effect happens when the
    /// command runs, but nothing is sent back to the application.
    pub fn effect(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            stream: Some(
                stream::once(future)
                    .filter_map(|()| async { None })
                    .boxed(),
            ),
        }
    }

    /// Batch multiple commands into a single command.
    ///
    /// All commands will be executed concurrently. The order in which
    /// messages arrive is not guaranteed. Commands that are `Command::none()`
    /// are automatically filtered out.
    ///
    /// # Examples
    ///
    /// ```
    /// use postcache::command::Command;
    ///
    /// enum Message {
    ///     First(i32),
    ///     Second(String),
    /// }
    ///
    /// let cmd = Command::batch(vec![
    ///     Command::perform(async { 1 }, Message::First),
    ///     Command::perform(async { "data".to_string() }, Message::Second),
    ///     Command::none(), // This will be filtered out
    /// ]);
    /// ```
    pub fn batch(commands: impl IntoIterator<Item = Command<Msg>>) -> Self {
        let streams: Vec<_> = commands.into_iter().filter_map(|cmd| cmd.stream).collect();

        if streams.is_empty() {
            Self::none()
        } else {
            Self {
                stream: Some(select_all(streams).boxed()),
            }
        }
    }

    /// Convert every message this command produces.
    ///
    /// # Examples
    ///
    /// ```
    /// use postcache::command::Command;
    ///
    /// let cmd: Command<String> = Command::future(async { 7 }).map(|n| n.to_string());
    /// ```
    pub fn map<B: Send + 'static>(self, f: impl Fn(Msg) -> B + Send + 'static) -> Command<B> {
        Command {
            stream: self.stream.map(|stream| stream.map(f).boxed()),
        }
    }

    /// Returns `true` if this command has nothing to run.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.stream.is_none()
    }

    /// Turns the command into the stream that performs it.
    ///
    /// `Command::none()` becomes an empty stream.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Msg> {
        self.stream.unwrap_or_else(|| stream::empty().boxed())
    }
}
