use std::collections::HashMap;

/// A header field map with case-insensitive keys, normalised (lowercased) at
/// insertion time rather than compared with a case-folding traits object on
/// every lookup.
#[derive(Debug, Default, Clone)]
pub struct HeaderBag {
    fields: HashMap<String, String>,
}

impl HeaderBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut bag = HeaderBag::new();
        bag.insert("Content-Type", "text/plain");
        assert_eq!(bag.get("content-type"), Some("text/plain"));
        assert_eq!(bag.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn missing_header_is_none() {
        let bag = HeaderBag::new();
        assert_eq!(bag.get("etag"), None);
    }

    #[test]
    fn insert_overwrites_regardless_of_case(){
        let mut bag = HeaderBag::new();
        bag.insert("ETag", "a");
        bag.insert("etag", "b");
        assert_eq!(bag.get("ETAG"), Some("b"));
    }
}
