//! Synchronization primitives.
//!
//! Channel-keyed sleep/wakeup: the condition-variable-like blocking
//! primitive every blocking path in the core is built on.

pub mod sleep;

pub use sleep::Channel;
