pub mod retry;
pub mod runner;

pub use retry::RetryPolicy;
pub use runner::{RunPolicy, Runner};
