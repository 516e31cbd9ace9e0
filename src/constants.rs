//! Constants shared across the control-channel client.

use std::time::Duration;

/// Upper bound on how long a token refresh may wait for the refresh slot and the upstream fetch.
pub const MAX_TOKEN_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Minimum remaining lifetime requested for tokens used on plain API calls.
pub const DEFAULT_API_MIN_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Minimum remaining lifetime requested for the token that opens the update stream.
///
/// The server resets a streaming session when its token expires and sessions last at most one
/// hour, so the token must be close to that maximum.
pub const DEFAULT_STREAM_MIN_TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

/// Minimum remaining lifetime of a cached bundle download URL before it is refreshed.
pub const DEFAULT_DOWNLOAD_URL_MIN_TTL: Duration = Duration::from_secs(60);

/// Cap on the number of error-body bytes retained for diagnostics.
pub const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Bundle key reported to watchers when the cluster configuration changes.
pub const CONFIG_BUNDLE_KEY: &str = "config";
