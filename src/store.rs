//! In-memory mock stores.
//!
//! [`Mocks`] holds a generated collection that responders read and mutate;
//! [`Mock`] holds a single generated record. Both are cheap cloneable
//! handles to the same process-lifetime state.
//!
//! Caller closures always run against a snapshot with no lock held, so they
//! may freely read or write the store they were handed to.

use crate::error::DefinitionError;
use crate::factory::{MockDefinition, MockFactory};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A generated collection of records.
pub struct Mocks<T> {
    items: Arc<RwLock<Items<T>>>,
    factory: MockFactory<T>,
}

/// Records plus a stamp bumped on every write.
struct Items<T> {
    records: Vec<T>,
    version: u64,
}

impl<T> Items<T> {
    fn replace(&mut self, records: Vec<T>) {
        self.records = records;
        self.version += 1;
    }
}

impl<T> Clone for Mocks<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            factory: self.factory.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mocks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mocks")
            .field("items", &self.items.read().records)
            .finish_non_exhaustive()
    }
}

/// Generate `count` records from `definition` into a new store.
pub fn mocks<T>(definition: MockDefinition, count: usize) -> Result<Mocks<T>, DefinitionError>
where
    T: Clone + DeserializeOwned,
{
    Mocks::new(MockFactory::new(definition), count)
}

impl<T> Mocks<T>
where
    T: Clone + DeserializeOwned,
{
    pub fn new(factory: MockFactory<T>, count: usize) -> Result<Self, DefinitionError> {
        let records = factory.generate(count, &[])?;
        Ok(Self {
            items: Arc::new(RwLock::new(Items { records, version: 0 })),
            factory,
        })
    }

    /// Snapshot of the current collection.
    pub fn value(&self) -> Vec<T> {
        self.items.read().records.clone()
    }

    fn snapshot(&self) -> (Vec<T>, u64) {
        let items = self.items.read();
        (items.records.clone(), items.version)
    }

    pub fn len(&self) -> usize {
        self.items.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().records.is_empty()
    }

    /// Replace the whole collection.
    pub fn set(&self, records: Vec<T>) {
        self.items.write().replace(records);
    }

    /// Replace the whole collection with `f(current)`.
    ///
    /// Writes made while `f` runs are overwritten by its result.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(Vec<T>) -> Vec<T>,
    {
        let next = f(self.value());
        self.set(next);
    }

    /// Generate one full record, merge `overrides` over it and append it.
    pub fn add(&self, overrides: Value) -> Result<T, DefinitionError> {
        let item = self
            .factory
            .generate(1, &[overrides])?
            .pop()
            .ok_or(DefinitionError::EmptyGeneration)?;
        let mut items = self.items.write();
        items.records.push(item.clone());
        items.version += 1;
        Ok(item)
    }

    /// Remove and return the first record matching `predicate`.
    pub fn remove<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        loop {
            let (snapshot, version) = self.snapshot();
            let index = snapshot.iter().position(&predicate)?;

            let mut items = self.items.write();
            // Collection changed while the predicate ran; look again.
            if items.version != version {
                continue;
            }
            items.version += 1;
            return Some(items.records.remove(index));
        }
    }

    /// First record matching `predicate`.
    pub fn get<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.value().into_iter().find(|item| predicate(item))
    }
}

/// A single generated record.
pub struct Mock<T> {
    item: Arc<RwLock<T>>,
    factory: MockFactory<T>,
}

impl<T> Clone for Mock<T> {
    fn clone(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
            factory: self.factory.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mock")
            .field("item", &*self.item.read())
            .finish_non_exhaustive()
    }
}

/// Generate one record from `definition`.
pub fn mock<T>(definition: MockDefinition) -> Result<Mock<T>, DefinitionError>
where
    T: Clone + DeserializeOwned,
{
    Mock::new(MockFactory::new(definition))
}

impl<T> Mock<T>
where
    T: Clone + DeserializeOwned,
{
    pub fn new(factory: MockFactory<T>) -> Result<Self, DefinitionError> {
        let item = generate_one(&factory)?;
        Ok(Self {
            item: Arc::new(RwLock::new(item)),
            factory,
        })
    }

    pub fn value(&self) -> T {
        self.item.read().clone()
    }

    pub fn set(&self, item: T) {
        *self.item.write() = item;
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.value());
        self.set(next);
    }

    /// Replace the record with a freshly generated one.
    pub fn regenerate(&self) -> Result<T, DefinitionError> {
        let item = generate_one(&self.factory)?;
        self.set(item.clone());
        Ok(item)
    }
}

fn generate_one<T: DeserializeOwned>(factory: &MockFactory<T>) -> Result<T, DefinitionError> {
    factory
        .generate(1, &[])?
        .pop()
        .ok_or(DefinitionError::EmptyGeneration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{auto_increment, boolean, lorem};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Article {
        id: i64,
        title: String,
        published: bool,
    }

    fn articles(count: usize) -> Mocks<Article> {
        mocks(
            MockDefinition::new()
                .field("id", auto_increment(1))
                .field("title", lorem(3))
                .field("published", boolean(0.5)),
            count,
        )
        .unwrap()
    }

    #[test]
    fn test_add_appends_generated_record() {
        let store = articles(10);
        let max_id = store.value().iter().map(|a| a.id).max().unwrap();

        let added = store.add(json!({"title": "x"})).unwrap();

        assert_eq!(store.len(), 11);
        assert_eq!(added.id, max_id + 1);
        assert_eq!(added.title, "x");
        assert_eq!(store.get(|a| a.title == "x"), Some(added));
    }

    #[test]
    fn test_ids_keep_counting_after_removal() {
        let store = articles(3);
        store.remove(|a| a.id == 3);
        let added = store.add(json!({})).unwrap();
        assert_eq!(added.id, 4);
    }

    #[test]
    fn test_remove_takes_only_first_match() {
        let store = articles(4);
        store.update(|items| {
            items
                .into_iter()
                .map(|mut a| {
                    a.published = true;
                    a
                })
                .collect()
        });

        let removed = store.remove(|a| a.published).unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(store.len(), 3);
        assert!(store.remove(|a| a.id == 99).is_none());
    }

    #[test]
    fn test_reads_do_not_mutate() {
        let store = articles(5);
        let before = store.value();
        let _ = store.get(|a| a.id == 2);
        let _ = store.get(|a| a.id == 42);
        assert_eq!(store.value(), before);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_set_replaces_everything() {
        let store = articles(5);
        store.set(vec![Article {
            id: 1,
            title: "only".to_string(),
            published: false,
        }]);
        assert_eq!(store.len(), 1);
        assert!(store.get(|a| a.title == "only").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let store = articles(2);
        let handle = store.clone();
        handle.add(json!({"title": "shared"})).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_add_with_bad_override_is_rejected() {
        let store = articles(1);
        assert!(store.add(json!({"id": "nope"})).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_closures_may_use_the_store() {
        let store = articles(3);
        let handle = store.clone();

        store.update(|mut items| {
            assert_eq!(handle.len(), 3);
            items.truncate(handle.len() - 1);
            items
        });
        assert_eq!(store.len(), 2);

        let found = store.get(|a| a.id == 2 && handle.len() == 2);
        assert_eq!(found.map(|a| a.id), Some(2));

        let removed = store.remove(|a| a.id == handle.value()[0].id);
        assert_eq!(removed.map(|a| a.id), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_rechecks_after_concurrent_write() {
        let store = articles(3);
        let handle = store.clone();
        let dropped_first = std::cell::Cell::new(false);

        let removed = store.remove(|a| {
            if !dropped_first.replace(true) {
                handle.update(|items| items.into_iter().filter(|a| a.id != 1).collect());
            }
            a.id == 2
        });

        assert_eq!(removed.map(|a| a.id), Some(2));
        let ids: Vec<i64> = store.value().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_single_mock() {
        let article: Mock<Article> = mock(
            MockDefinition::new()
                .field("id", auto_increment(7))
                .field("title", lorem(2))
                .field("published", boolean(1.0)),
        )
        .unwrap();

        assert_eq!(article.value().id, 7);
        article.update(|a| Article {
            title: "edited".to_string(),
            ..a.clone()
        });
        assert_eq!(article.value().title, "edited");

        let handle = article.clone();
        article.update(|a| Article {
            title: format!("{} {}", a.title, handle.value().id),
            ..a.clone()
        });
        assert_eq!(article.value().title, "edited 7");
        assert_eq!(article.regenerate().unwrap().id, 8);
    }
}
