//! Consumption log domain module (event-sourced).
//!
//! Records what a requester did with delivered stock: pharmacies sell,
//! hospitals dispense. Valuation subtracts these quantities from delivered
//! stock, so the log is append-only and never edited.

pub mod log;

pub use log::{
    RecordUsage, UsageCommand, UsageEvent, UsageKind, UsageLog, UsageLogId, UsageRecorded,
    UsageTotals,
};
