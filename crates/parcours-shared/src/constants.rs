/// Application name
pub const APP_NAME: &str = "Parcours";

/// Prefix marking a proof id generated locally, before any server write
pub const PROVISIONAL_PROOF_PREFIX: &str = "offline-";

/// Live channel event names (server -> client)
pub const EVENT_NEW_MESSAGE: &str = "new_message";
pub const EVENT_USER_TYPING: &str = "user_typing";

/// Live channel event name (client -> server)
pub const EVENT_TYPING: &str = "typing";

/// Message type tag used for plain text messages
pub const MESSAGE_TYPE_TEXT: &str = "TEXT";

/// Default backend API base URL (local development)
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// Live channel reconnect backoff, in milliseconds
pub const LIVE_RECONNECT_INITIAL_MS: u64 = 1_000;
pub const LIVE_RECONNECT_MAX_MS: u64 = 30_000;

/// Connectivity check period in seconds
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 15;

/// HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
