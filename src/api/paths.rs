//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub const EXPIRE_KEYS: &str = "/expire-keys";

pub mod rate_limits {
    pub const TAKE: &str = "/v1/ratelimit.take";
    pub const CHECK: &str = "/v1/ratelimit.check/{identifier}";
    pub const STATS: &str = "/v1/ratelimit.stats";
}

/// Node-to-node reconciliation
pub const PUSHPULL: &str = "/v1/ratelimit.pushpull";

pub fn check_path(identifier: &str) -> String {
    rate_limits::CHECK.replace("{identifier}", identifier)
}
