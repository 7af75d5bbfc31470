//! User-Agent firewall rules.
//!
//! Matching is case-insensitive substring containment: a list entry "bot"
//! rejects "Evilbot/1.0". Lower-casing of inbound header values is memoized
//! by [`UserAgentNormalizer`].

use std::{collections::HashMap, sync::RwLock};

// Distinct User-Agents seen in practice number in the hundreds; past this the
// cache is assumed polluted by randomized agents and is dropped wholesale.
const MAX_CACHE_SIZE: usize = 1000;

/// Memoizes lower-cased User-Agent strings, keyed by the raw header value.
pub struct UserAgentNormalizer {
    cache: RwLock<HashMap<String, String>>,
}

impl UserAgentNormalizer {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Lower-cased form of `user_agent`, computed once per distinct value.
    pub fn normalize(&self, user_agent: &str) -> String {
        if let Some(cached) = self
            .cache
            .read()
            .expect("ua cache lock poisoned")
            .get(user_agent)
        {
            return cached.clone();
        }

        let normalized = user_agent.to_lowercase();

        let mut cache = self.cache.write().expect("ua cache lock poisoned");
        if cache.len() >= MAX_CACHE_SIZE {
            cache.clear();
        }
        cache
            .entry(user_agent.to_string())
            .or_insert_with(|| normalized.clone());

        normalized
    }

    pub fn len(&self) -> usize {
        self.cache.read().expect("ua cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UserAgentNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// True when the normalized UA contains any list entry (entries are folded to
/// lowercase before the containment check).
pub fn ua_matches_list(normalized_ua: &str, list: &[String]) -> bool {
    list.iter()
        .any(|entry| normalized_ua.contains(&entry.to_lowercase()))
}
