//! System utilities module.
//!
//! Holds the per-instance mutual-exclusion primitive shared by the
//! local and cloud instance providers.

mod locker;

pub use locker::{Locker, LockerGuard};
