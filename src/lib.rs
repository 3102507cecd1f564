//! packflow: order tracking for a packaging plant.
//!
//! Orders move through a fixed stage pipeline (Design, Printing,
//! Lamination, DieCut, Assembly, Packing, Dispatch). Each department sees a
//! queue, records details and proof files, and advances the order once its
//! stage is complete. The domain rules live in `packflow-common`; this
//! crate adds the document store, authentication, PDFs and the dashboard.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod contact;
pub mod dashboard;
pub mod errors;
pub mod files;
pub mod logging;
pub mod qr;
pub mod slip;
pub mod store;
