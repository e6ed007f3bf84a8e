//! Ledger module containing account management, journal entries and the facade

pub mod account;
pub mod core;
pub mod moves;

pub use account::*;
pub use core::*;
pub use moves::*;
