// Library crate - exports the trading core used by the pipeline binary

pub mod trading_core;

// Re-export commonly used types
pub use trading_core::*;
