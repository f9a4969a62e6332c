/// Application name
pub const APP_NAME: &str = "Tutorlink";

/// Default HTTP API / gateway port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum message body size in bytes (16 KiB)
pub const MAX_BODY_SIZE: usize = 16_384;

/// Maximum number of attachments per message
pub const MAX_ATTACHMENTS: usize = 10;

/// Default page size for history fetches
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Hard cap for history fetch page size
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Retention window for submit deduplication, in seconds.
/// A retried submit with the same (sender, correlation id) inside this
/// window returns the already-persisted message.
pub const DEDUP_WINDOW_SECS: u64 = 120;

/// Initial reconnect backoff delay in milliseconds
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Maximum reconnect backoff delay in milliseconds
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Default handshake timeout in seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a single submit call in seconds
pub const SUBMIT_TIMEOUT_SECS: u64 = 15;
