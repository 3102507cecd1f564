//! Shared domain types for packflow.
//!
//! Everything in this crate is pure: no I/O, no async. The server crate
//! loads JSON records from the document store, turns them into [`Order`]s
//! here, asks [`lifecycle`] what a mutation should write, and sends the
//! resulting patch back to the store.

pub mod ids;
pub mod lifecycle;
pub mod order;
pub mod stage;
pub mod timefmt;

pub use lifecycle::{AdvancePlan, LifecycleError, Patch, Requirement};
pub use order::{FileEntry, Order, Priority};
pub use stage::{ProductType, Stage};
