pub mod config;
pub mod digest;
pub mod toolchain;
pub mod types;
