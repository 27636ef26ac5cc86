//! Exit codes of the catdiff binary

/// Success - every host compiled and none regressed
pub const SUCCESS: u8 = 0;

/// Run failure - at least one host ended in error or fail
pub const RUN_FAILURE: u8 = 1;

/// Configuration or usage error, detected before any compilation
pub const USAGE_ERROR: u8 = 2;
