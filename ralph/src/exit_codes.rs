//! Stable exit codes for ralph CLI commands.

/// The bead reached `completed` (or the command succeeded).
pub const OK: i32 = 0;
/// The bead reached `failed`, or a fatal precondition error occurred
/// (missing/malformed bead, agent CLI unavailable, invalid config).
pub const FAILED: i32 = 1;
