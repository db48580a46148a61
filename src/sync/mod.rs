//! Relational <-> realtime synchronization
//!
//! - `mapper`: loosely-typed realtime records -> normalized rows
//! - `gate`: timestamp staleness check
//! - `service`: bulk reconciliation, live listener and outbound publishing
//! - `boot`: startup ordering of reconciliation and admin bootstrap

pub mod boot;
pub mod gate;
pub mod mapper;
pub mod service;

pub use boot::boot;
pub use gate::GateDecision;
pub use mapper::{FromRecord, MapError, Mapped, Substitution};
pub use service::{ApplyOutcome, KindReport, ReconcileReport, SyncService};
