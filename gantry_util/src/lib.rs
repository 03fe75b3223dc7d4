#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Implements the retry pacer that the broker-facing loops lean on.
mod backoff {
    pub mod config;
    pub mod wrapper;
}
pub use self::backoff::{config::BackoffConfig, wrapper::Backoff};
