pub mod filesystem;
pub mod redis;
pub mod register;
pub mod sql;

pub use register::BackendConfigs;
