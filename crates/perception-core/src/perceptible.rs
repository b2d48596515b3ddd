#![forbid(unsafe_code)]

//! The observable-type trait.

use crate::registrar::{Registrar, RegistrarId};
use crate::tracking::ChangeEvent;

/// A type whose fields report reads and writes through a [`Registrar`].
///
/// Implementors own one registrar and route every tracked getter through
/// [`Registrar::access`] and every tracked setter through
/// [`Registrar::with_mutation`] (or [`Registrar::set_if_changed`]).
///
/// ```
/// use perception_core::{Perceptible, PropertyKey, Registrar};
///
/// #[derive(Default)]
/// struct Counter {
///     count: i64,
///     registrar: Registrar,
/// }
///
/// impl Counter {
///     const COUNT: PropertyKey = PropertyKey::new("count");
///
///     fn count(&self) -> i64 {
///         self.registrar.access(Self::COUNT);
///         self.count
///     }
///
///     fn set_count(&mut self, count: i64) {
///         self.registrar.with_mutation(Self::COUNT, || self.count = count);
///     }
/// }
///
/// impl Perceptible for Counter {
///     fn perception_registrar(&self) -> &Registrar {
///         &self.registrar
///     }
/// }
///
/// let mut counter = Counter::default();
/// counter.set_count(2);
/// assert_eq!(counter.count(), 2);
/// ```
pub trait Perceptible {
    /// The registrar mediating this instance's fields.
    fn perception_registrar(&self) -> &Registrar;

    /// Identity of this instance.
    fn registrar_id(&self) -> RegistrarId {
        self.perception_registrar().id()
    }

    /// Whether `event` was raised by this instance.
    fn raised(&self, event: &ChangeEvent) -> bool {
        event.registrar() == self.registrar_id()
    }
}

impl<P: Perceptible + ?Sized> Perceptible for &P {
    fn perception_registrar(&self) -> &Registrar {
        (**self).perception_registrar()
    }
}

impl<P: Perceptible + ?Sized> Perceptible for std::sync::Arc<P> {
    fn perception_registrar(&self) -> &Registrar {
        (**self).perception_registrar()
    }
}
