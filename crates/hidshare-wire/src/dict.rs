use std::collections::HashMap;

/// Resolves application message names to wire type codes and back.
///
/// The structural payload encoder/decoder lives behind this seam too;
/// hidshare-wire only moves opaque payload bytes and never inspects them.
pub trait MessageDict {
    /// Wire type code for a message name, if the dictionary knows it.
    fn code_for(&self, name: &str) -> Option<u16>;

    /// Human-readable message name for a wire type code.
    fn name_for(&self, code: u16) -> Option<String>;
}

/// A fixed, in-memory dictionary built from `(code, name)` pairs.
#[derive(Debug, Clone, Default)]
pub struct StaticDict {
    by_code: HashMap<u16, String>,
    by_name: HashMap<String, u16>,
}

impl StaticDict {
    /// Build a dictionary from embedded entries.
    pub fn from_entries(entries: &[(u16, &str)]) -> Self {
        let mut dict = Self::default();
        for (code, name) in entries {
            dict.insert(*code, name);
        }
        dict
    }

    /// Register one message type. Later entries win on collision.
    pub fn insert(&mut self, code: u16, name: &str) {
        self.by_code.insert(code, name.to_string());
        self.by_name.insert(name.to_string(), code);
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl MessageDict for StaticDict {
    fn code_for(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    fn name_for(&self, code: u16) -> Option<String> {
        self.by_code.get(&code).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_entries_resolves_both_directions() {
        let dict = StaticDict::from_entries(&[(0, "Initialize"), (17, "Features")]);

        assert_eq!(dict.code_for("Initialize"), Some(0));
        assert_eq!(dict.code_for("Features"), Some(17));
        assert_eq!(dict.name_for(0).as_deref(), Some("Initialize"));
        assert_eq!(dict.name_for(17).as_deref(), Some("Features"));
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn unknown_entries_resolve_to_none() {
        let dict = StaticDict::from_entries(&[(1, "Ping")]);

        assert_eq!(dict.code_for("Pong"), None);
        assert_eq!(dict.name_for(2), None);
    }

    #[test]
    fn empty_dictionary() {
        let dict = StaticDict::default();
        assert!(dict.is_empty());
        assert_eq!(dict.name_for(0), None);
    }
}
