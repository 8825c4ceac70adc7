//! Environment overlays for chrooted commands.
//!
//! An [`Environment`] is the set of variables layered on top of the inherited
//! process environment whenever a command runs inside the target root.
//! Merging never mutates: [`Environment::merged`] returns a new mapping and
//! leaves the caller's copy untouched.

use std::collections::BTreeMap;

/// `PATH` used inside the target root, independent of the host's `PATH`.
pub const CHROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Ordered environment variable mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the base environment for commands run inside a chroot.
    ///
    /// Locale is pinned to `C` so tool output stays parseable, and `HOME`
    /// points at root's home inside the target.
    pub fn for_chroot() -> Self {
        [
            ("LANG", "C"),
            ("LC_ALL", "C"),
            ("HOME", "/root"),
            ("PATH", CHROOT_PATH),
        ]
        .into_iter()
        .collect()
    }

    /// Returns a new environment with `overlay` applied on top of `self`.
    ///
    /// Keys present in both take the overlay's value.
    #[must_use]
    pub fn merged<I, K, V>(&self, overlay: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = self.vars.clone();
        vars.extend(overlay.into_iter().map(|(k, v)| (k.into(), v.into())));
        Self { vars }
    }

    /// Returns the value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_leaves_original_untouched() {
        let base = Environment::for_chroot();
        let snapshot = base.clone();

        let merged = base.merged([("MAKEOPTS", "-j4")]);

        assert_eq!(base, snapshot);
        assert_eq!(base.get("MAKEOPTS"), None);
        assert_eq!(merged.get("MAKEOPTS"), Some("-j4"));
        assert_eq!(merged.get("LC_ALL"), Some("C"));
        assert_eq!(merged.len(), base.len() + 1);
    }

    #[test]
    fn merged_overlay_wins_on_conflict() {
        let base: Environment = [("MAKEOPTS", "-j1")].into_iter().collect();
        let merged = base.merged([("MAKEOPTS", "-j8")]);
        assert_eq!(merged.get("MAKEOPTS"), Some("-j8"));
        assert_eq!(base.get("MAKEOPTS"), Some("-j1"));
    }

    #[test]
    fn iter_is_key_ordered() {
        let env: Environment = [("b", "2"), ("a", "1")].into_iter().collect();
        let keys: Vec<&str> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn for_chroot_pins_path_and_locale() {
        let env = Environment::for_chroot();
        assert_eq!(env.get("PATH"), Some(CHROOT_PATH));
        assert_eq!(env.get("LANG"), Some("C"));
        assert!(!env.is_empty());
    }
}
