//! Parameter binding environments for shape matching.

/// Static/stack compatible parameter bindings.
pub type StackEnvironment<'a> = &'a [(&'a str, usize)];

/// Read access to a set of parameter bindings.
pub trait StackMap<'a> {
    /// Look up the value bound to `key`.
    #[must_use]
    fn lookup(
        &self,
        key: &str,
    ) -> Option<usize>;
}

impl<'a> StackMap<'a> for StackEnvironment<'a> {
    #[inline]
    fn lookup(
        &self,
        key: &str,
    ) -> Option<usize> {
        self.iter().find(|(k, _)| *k == key).map(|&(_, v)| v)
    }
}

/// A growable environment layered over a fixed [`StackEnvironment`].
///
/// Bindings discovered while matching are recorded in `updates`;
/// the `backing` bindings are never modified.
#[derive(Debug, Clone)]
pub struct MutableStackEnvironment<'a> {
    /// The caller-supplied bindings.
    pub backing: StackEnvironment<'a>,

    /// Bindings discovered during matching.
    pub updates: Vec<(&'a str, usize)>,
}

impl<'a> MutableStackEnvironment<'a> {
    /// Create a new environment over `backing`.
    #[must_use]
    pub fn new(backing: StackEnvironment<'a>) -> Self {
        Self {
            backing,
            updates: Vec::new(),
        }
    }

    /// Bind `key` to `value`.
    ///
    /// ## Panics
    ///
    /// In debug builds, if `key` is already bound.
    pub fn bind(
        &mut self,
        key: &'a str,
        value: usize,
    ) {
        debug_assert!(
            self.lookup(key).is_none(),
            "Parameter \"{key}\" is already bound"
        );
        self.updates.push((key, value));
    }

    /// Export the values of `keys`, in order.
    ///
    /// ## Panics
    ///
    /// If any key is unbound.
    #[must_use]
    pub fn export_key_values<const K: usize>(
        &self,
        keys: &[&str; K],
    ) -> [usize; K] {
        let mut values = [0; K];
        for (value, key) in values.iter_mut().zip(keys.iter()) {
            *value = match self.lookup(key) {
                Some(v) => v,
                None => panic!("No value for key \"{key}\""),
            };
        }
        values
    }

    /// Render all bindings as `{"k": v, ...}` for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        let entries = self
            .backing
            .iter()
            .chain(self.updates.iter())
            .map(|(k, v)| format!("\"{k}\": {v}"))
            .collect::<Vec<_>>();
        format!("{{{}}}", entries.join(", "))
    }
}

impl<'a> StackMap<'a> for MutableStackEnvironment<'a> {
    #[inline]
    fn lookup(
        &self,
        key: &str,
    ) -> Option<usize> {
        // Newly bound keys are the ones usually exported; check them first.
        self.updates
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, v)| v)
            .or_else(|| self.backing.lookup(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_environment_lookup() {
        let env: StackEnvironment = &[("a", 1), ("b", 2)];
        assert_eq!(env.lookup("a"), Some(1));
        assert_eq!(env.lookup("b"), Some(2));
        assert_eq!(env.lookup("c"), None);
    }

    #[test]
    fn test_mutable_environment() {
        let mut env = MutableStackEnvironment::new(&[("a", 1)]);
        env.bind("b", 7);

        assert_eq!(env.lookup("a"), Some(1));
        assert_eq!(env.lookup("b"), Some(7));
        assert_eq!(env.export_key_values(&["b", "a"]), [7, 1]);
        assert_eq!(env.describe(), "{\"a\": 1, \"b\": 7}");
    }

    #[test]
    #[should_panic(expected = "No value for key \"z\"")]
    fn test_export_missing_key() {
        let env = MutableStackEnvironment::new(&[("a", 1)]);
        let _ = env.export_key_values(&["z"]);
    }
}
