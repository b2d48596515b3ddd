use perception::{Perceptible, PropertyKey, Registrar};

/// Observable counter with a display name.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CounterModel {
    count: i64,
    name: String,
    registrar: Registrar,
}

impl CounterModel {
    pub const COUNT: PropertyKey = PropertyKey::new("count");
    pub const NAME: PropertyKey = PropertyKey::new("name");

    #[must_use]
    pub fn count(&self) -> i64 {
        self.registrar.access(Self::COUNT);
        self.count
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.registrar.access(Self::NAME);
        &self.name
    }

    pub fn set_count(&mut self, count: i64) {
        self.registrar
            .with_mutation(Self::COUNT, || self.count = count);
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.registrar.with_mutation(Self::NAME, || self.name = name);
    }

    /// Returns `false` (and notifies nobody) when `count` is unchanged.
    pub fn set_count_if_changed(&mut self, count: i64) -> bool {
        self.registrar
            .set_if_changed(Self::COUNT, &mut self.count, count)
    }

    /// Returns `false` (and notifies nobody) when `name` is unchanged.
    pub fn set_name_if_changed(&mut self, name: impl Into<String>) -> bool {
        self.registrar
            .set_if_changed(Self::NAME, &mut self.name, name.into())
    }
}

impl Perceptible for CounterModel {
    fn perception_registrar(&self) -> &Registrar {
        &self.registrar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perception::track;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn getters_record_and_setters_notify() {
        let mut model = CounterModel::default();
        let changed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&changed);

        let seen = track(|| model.name().to_owned(), move || flag.store(true, Ordering::SeqCst));
        assert_eq!(seen, "");

        model.set_count(3);
        assert!(!changed.load(Ordering::SeqCst));
        model.set_name("ada");
        assert!(changed.load(Ordering::SeqCst));
        assert_eq!(model.count(), 3);
        assert_eq!(model.name(), "ada");
    }

    #[test]
    fn gated_setters_report_change() {
        let mut model = CounterModel::default();
        assert!(!model.set_count_if_changed(0));
        assert!(model.set_count_if_changed(1));
        assert!(!model.set_name_if_changed(""));
        assert!(model.set_name_if_changed("x"));
    }
}
