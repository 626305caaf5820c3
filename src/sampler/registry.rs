// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::collections::HashMap;

use parking_lot::RwLock;

/// A name to value map shared between the sampler and its instruments.
pub struct Registry<T: Clone> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Registry<T> {
        Registry::default()
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.entries.read().get(name).cloned()
    }

    /// Stores the value, returning the one it replaced.
    pub fn set(&self, name: impl Into<String>, value: T) -> Option<T> {
        self.entries.write().insert(name.into(), value)
    }

    /// Removes the value, returning it if it was present.
    pub fn delete(&self, name: &str) -> Option<T> {
        self.entries.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns a copy of every entry, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, T)> {
        let mut entries: Vec<(String, T)> = self
            .entries
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(None, registry.get("a"));

        assert_eq!(None, registry.set("b", 2));
        assert_eq!(None, registry.set("a", 1));
        assert_eq!(Some(2), registry.set("b", 3));
        assert_eq!(Some(3), registry.get("b"));
        assert!(registry.contains("a"));
        assert_eq!(2, registry.len());
        assert_eq!(vec!["a", "b"], registry.names());
        assert_eq!(
            vec![("a".to_string(), 1), ("b".to_string(), 3)],
            registry.snapshot()
        );

        assert_eq!(Some(1), registry.delete("a"));
        assert_eq!(None, registry.delete("a"));
        assert!(!registry.contains("a"));
    }
}
