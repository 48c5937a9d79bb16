//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attribute values.
/// A currency code or a set of contact fields is a value object; an account or a
/// customer is an entity.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct ContactInfo {
///     city: Option<String>,
///     zip: Option<String>,
/// }
///
/// impl ValueObject for ContactInfo {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
