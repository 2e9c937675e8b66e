//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value** - a
/// `RateObservation { value: 42.0, .. }` equals any other observation with the
/// same fields, while a `Currency` with the same fields but a different ID is
/// a different entity. To "modify" a value object, create a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
