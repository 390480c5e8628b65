//! Hard limits enforced at the engine boundary.

/// Upper bound on a display name (agency, site, bed, room, case).
pub const MAX_NAME_LEN: usize = 256;

/// Upper bound on free-text notes attached to requests and occupancies.
pub const MAX_NOTES_LEN: usize = 4096;

/// Upper bound on a denial reason.
pub const MAX_REASON_LEN: usize = 1024;

/// Upper bound on the acting user id recorded for audit.
pub const MAX_ACTOR_LEN: usize = 256;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

pub const MAX_BEDS_PER_NETWORK: usize = 100_000;
pub const MAX_REQUESTS_PER_NETWORK: usize = 1_000_000;

/// Networks (pgwire databases) served by one process.
pub const MAX_NETWORKS: usize = 64;
pub const MAX_NETWORK_NAME_LEN: usize = 128;

/// Commit attempts for a WAL append before the error surfaces as internal.
pub const MAX_COMMIT_ATTEMPTS: u32 = 3;
pub const COMMIT_BACKOFF_BASE_MS: u64 = 10;
