/// The command succeeded.
pub const NO_ERROR: i32 = 0;

/// The command failed.
pub const FATAL_ERROR: i32 = 2;
