//! Medicine catalog domain module (event-sourced).
//!
//! This crate contains business rules for the medicine catalog, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod medicine;

pub use medicine::{
    Medicine, MedicineCommand, MedicineEvent, MedicinePricesUpdated, MedicineRegistered,
    RegisterMedicine, UpdateMedicinePrices,
};
