#![forbid(unsafe_code)]

//! Property keys.

use std::fmt;

/// Opaque identifier for one declared field of an observable type.
///
/// Keys are minted once per field, typically as associated constants, and
/// are only ever compared and hashed. Two keys are equal iff their labels are
/// equal, so labels must be unique within one observable type. Keys of
/// different types never meet: access lists and registrars are partitioned
/// per instance first.
///
/// ```
/// use perception_core::PropertyKey;
///
/// struct Model;
///
/// impl Model {
///     const COUNT: PropertyKey = PropertyKey::new("count");
///     const NAME: PropertyKey = PropertyKey::new("name");
/// }
///
/// assert_ne!(Model::COUNT, Model::NAME);
/// assert_eq!(Model::COUNT.name(), "count");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey(&'static str);

impl PropertyKey {
    /// Mint a key from a static label.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The label this key was minted with.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyKey({})", self.0)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
