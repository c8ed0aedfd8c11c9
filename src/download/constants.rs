//! Constants for the download module (timeouts, chunking, size limits).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default chunk size; resources larger than this are split on disk (32 MiB).
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 32 * 1024 * 1024;

/// Default upper bound on an accepted resource (256 MiB).
pub const DEFAULT_MAX_SIZE: u64 = 256 * 1024 * 1024;
