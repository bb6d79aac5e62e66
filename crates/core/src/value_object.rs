//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - two allocation
/// lines with the same batch, quantity, and price are the same line. To
/// "modify" a value object, construct a new one.
///
/// The trait requires `Clone + PartialEq + Debug` so values can be copied,
/// compared, and inspected like primitives.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
