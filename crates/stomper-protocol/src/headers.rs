//! The ordered header bag carried by every frame.

use crate::ProtocolError;

/// Well-known header names.
pub mod names {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

/// Ordered string-to-string mapping with unique keys.
///
/// Insertion order is preserved because it is the order headers go on the
/// wire. Setting an existing key replaces its value in place; the key keeps
/// its original position.
///
/// Lookups are linear. Frames carry a handful of headers, so a `Vec` beats
/// a hash map here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBag {
    entries: Vec<(String, String)>,
}

impl HeaderBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, returning the previous value if there was one.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterates `(key, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses the `content-length` header, if present.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidContentLength`] if the value isn't a
    /// non-negative integer.
    pub fn content_length(&self) -> Result<Option<usize>, ProtocolError> {
        match self.get(names::CONTENT_LENGTH) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string())),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderBag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (k, v) in iter {
            bag.set(k, v);
        }
        bag
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HeaderBag
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_existing_key_overwrites_in_place() {
        let mut bag = HeaderBag::from([("a", "1"), ("b", "2")]);

        let previous = bag.set("a", "3");

        assert_eq!(previous.as_deref(), Some("1"));
        assert_eq!(bag.len(), 2);
        let order: Vec<_> = bag.iter().collect();
        assert_eq!(order, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_from_iter_duplicate_keys_last_write_wins() {
        let bag: HeaderBag = vec![("k", "first"), ("k", "second")].into_iter().collect();
        assert_eq!(bag.get("k"), Some("second"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_content_length_parses_and_rejects_garbage() {
        assert_eq!(HeaderBag::new().content_length(), Ok(None));
        let bag = HeaderBag::from([(names::CONTENT_LENGTH, "12")]);
        assert_eq!(bag.content_length(), Ok(Some(12)));
        let bad = HeaderBag::from([(names::CONTENT_LENGTH, "-1")]);
        assert!(matches!(
            bad.content_length(),
            Err(ProtocolError::InvalidContentLength(_))
        ));
    }
}
