pub mod backends;
pub mod retention;
pub mod sweeper;
pub mod template;

pub use template::{ImageRecord, ImageStore, StoreError, StoreResult, StoreStats};
