//! Process exit codes. Part of the public contract of `tenet`.
//! Accuracy never changes the exit code.

pub const SUCCESS: i32 = 0;
/// Missing files, schema violations, missing ground truth or API key.
pub const CONFIG_ERROR: i32 = 2;
/// Unexpected failure after setup, e.g. a report could not be written.
pub const RUNTIME_ERROR: i32 = 3;
