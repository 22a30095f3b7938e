use std::collections::HashMap;

/// Headers as seen by script code: exactly one value per name.
pub type Headers = HashMap<String, String>;

/// Multi-valued headers in the shape transports carry them.
///
/// Entries keep insertion order, so every name's values stay in the order they
/// were appended. That order is what makes [`HeaderMultiMap::narrow`] deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMultiMap {
    entries: Vec<(String, String)>,
}

impl HeaderMultiMap {
    /// Creates an empty header multi-map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a value for `name`, keeping any values already present.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns every value appended for `name`, oldest first.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(entry_name, _)| entry_name == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns true if no header has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of `(name, value)` pairs, counting repeated names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Narrows to one value per name.
    ///
    /// This is lossy: when a name carries several values, the value appended last
    /// wins and the others are dropped. Callers that need every value should read
    /// the multi-map directly with [`HeaderMultiMap::get_all`].
    #[must_use]
    pub fn narrow(&self) -> Headers {
        let mut headers = Headers::with_capacity(self.entries.len());

        for (name, value) in &self.entries {
            headers.insert(name.clone(), value.clone());
        }

        headers
    }
}

impl From<&Headers> for HeaderMultiMap {
    /// Each mapping entry becomes a single-valued header. Names are sorted so the
    /// wire order does not depend on hash map iteration.
    fn from(headers: &Headers) -> Self {
        let mut pairs: Vec<_> = headers.iter().collect();
        pairs.sort_unstable();

        pairs
            .into_iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMultiMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, value) in iter {
            map.append(name, value);
        }
        map
    }
}
