//! Order domain module (event-sourced).
//!
//! This crate contains the business rules for the order fulfillment
//! lifecycle, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage). Hospital and pharmacy orders share one aggregate,
//! parameterized by the requester kind.

pub mod order;

pub use order::{
    ConfirmDelivered, DeliveryRequested, DispatchedBatch, Order, OrderCommand, OrderDelivered,
    OrderDispatched, OrderEvent, OrderId, OrderPlaced, OrderRejected, OrderStatus, PlaceOrder,
    RecordDispatch, RejectOrder, RequestDelivery, RequesterKind,
};
