//! Vendor stock domain module (event-sourced).
//!
//! This crate contains the business rules for batch-tracked vendor inventory:
//! the `Batch` entity, the pure first-expire-first-out allocator, and the
//! `VendorStock` aggregate whose commit operation is the body of the stock
//! ledger's critical section. Implemented purely as deterministic domain
//! logic (no IO, no HTTP, no storage).

pub mod allocation;
pub mod batch;
pub mod stock;

pub use allocation::{AllocationLine, AllocationPlan, allocate};
pub use batch::Batch;
pub use stock::{
    AllocationReleased, BatchRegistered, CommitAllocation, RegisterBatch, ReleaseAllocation,
    StockAllocated, StockCommand, StockEvent, StockId, VendorStock,
};
