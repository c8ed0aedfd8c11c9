//! Shared User-Agent string for page fetches and downloads.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvester";

/// Default User-Agent for all harvester traffic.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (+{PROJECT_UA_URL})")
}
