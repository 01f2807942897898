//! An in-process document store with the same versioning and transaction
//! behaviour as the postgres one. Connections handed out by one
//! `MemoryConnectionManager` all see the same documents.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use err_derive::Error;
use log::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id};
use crate::persistence::{ConcurrencyError, Storage};

const VERSION_FIELD: &str = "_version";

#[derive(Debug, Error)]
#[error(display = "in-process store poisoned by a panicked writer")]
pub struct PoisonedStore;

#[derive(Debug, Clone, Default)]
struct Tables {
    documents: BTreeMap<String, Value>,
    revision: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionManager {
    shared: Arc<Mutex<Tables>>,
}

/// One connection to the in-process store. Inside `in_transaction` all reads
/// and writes go to a private copy that replaces the shared tables on success.
#[derive(Debug)]
pub struct MemoryDocuments {
    shared: Arc<Mutex<Tables>>,
    staged: RefCell<Option<Tables>>,
}

impl MemoryConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl r2d2::ManageConnection for MemoryConnectionManager {
    type Connection = MemoryDocuments;
    type Error = PoisonedStore;

    fn connect(&self) -> Result<MemoryDocuments, PoisonedStore> {
        Ok(MemoryDocuments {
            shared: self.shared.clone(),
            staged: RefCell::new(None),
        })
    }

    fn is_valid(&self, _: &mut MemoryDocuments) -> Result<(), PoisonedStore> {
        Ok(())
    }

    fn has_broken(&self, conn: &mut MemoryDocuments) -> bool {
        conn.shared.is_poisoned()
    }
}

impl MemoryDocuments {
    fn lock(&self) -> Result<MutexGuard<Tables>, PoisonedStore> {
        self.shared.lock().map_err(|_| PoisonedStore)
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R>) -> Result<R> {
        if let Some(staged) = self.staged.borrow_mut().as_mut() {
            return f(staged);
        }
        let mut tables = self.lock()?;
        f(&mut tables)
    }

    fn scan<D: DeserializeOwned + Entity>(
        &self,
        matches: impl Fn(&Value) -> bool,
    ) -> Result<Vec<D>> {
        let prefix = Id::<D>::prefix();
        self.with_tables(|tables| {
            tables
                .documents
                .range(prefix.clone()..)
                .take_while(|(id, _)| id.starts_with(&prefix))
                .filter(|(_, body)| matches(body))
                .map(|(_, body)| Ok(serde_json::from_value(body.clone())?))
                .collect()
        })
    }
}

/// The private copy a unit of work writes to. Dropped unfinished, as when the
/// unit of work panics, the copy is thrown away.
struct Staging<'a>(&'a RefCell<Option<Tables>>);

impl<'a> Staging<'a> {
    fn begin(slot: &'a RefCell<Option<Tables>>, tables: Tables) -> Self {
        *slot.borrow_mut() = Some(tables);
        Staging(slot)
    }

    fn finish(self) -> Option<Tables> {
        self.0.borrow_mut().take()
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        self.0.borrow_mut().take();
    }
}

fn version_of(body: &Value) -> &str {
    body.get(VERSION_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

impl Storage for MemoryDocuments {
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        let key = id.to_string();
        self.with_tables(|tables| match tables.documents.get(&key) {
            Some(body) => Ok(Some(serde_json::from_value(body.clone())?)),
            None => Ok(None),
        })
    }

    fn load_all<D: DeserializeOwned + Entity>(&self) -> Result<Vec<D>> {
        self.scan(|_| true)
    }

    fn find_by<D: DeserializeOwned + Entity>(
        &self,
        path: &[&str],
        value: &str,
    ) -> Result<Vec<D>> {
        let pointer = path.iter().fold(String::new(), |mut p, segment| {
            p.push('/');
            p.push_str(segment);
            p
        });
        self.scan(|body| body.pointer(&pointer).and_then(Value::as_str) == Some(value))
    }

    fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        let key = document.meta().id.to_string();
        let expected = document.meta().version.clone();
        let mut body = serde_json::to_value(&*document)?;

        let version = self.with_tables(|tables| {
            let current = tables.documents.get(&key).map(version_of);
            let fresh = match current {
                None => expected.is_empty(),
                Some(current) => !expected.is_empty() && current == expected.as_ref(),
            };
            if !fresh {
                warn!("Save of {} with stale version {:?}", key, expected);
                return Err(ConcurrencyError.into());
            }

            tables.revision += 1;
            let version = format!("{:x}", tables.revision);
            match body.as_object_mut() {
                Some(fields) => {
                    fields.insert(VERSION_FIELD.to_string(), Value::String(version.clone()))
                }
                None => bail!("Document {} is not a JSON object", key),
            };
            tables.documents.insert(key.clone(), body);
            Ok(version)
        })?;

        debug!("Saved {} at version {}", key, version);
        document.meta_mut().version = Version::from(version);
        Ok(())
    }

    fn delete<D: Entity + HasMeta>(&self, document: &D) -> Result<()> {
        let meta = document.meta();
        let key = meta.id.to_string();
        self.with_tables(|tables| {
            let current = tables.documents.get(&key).map(version_of);
            if current != Some(meta.version.as_ref()) {
                warn!("Delete of {} with stale version {:?}", key, meta.version);
                return Err(ConcurrencyError.into());
            }
            tables.documents.remove(&key);
            Ok(())
        })
    }

    fn in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        if self.staged.borrow().is_some() {
            return f(self);
        }

        // Held until the end so that writers are serialized.
        let mut tables = self.lock()?;
        let staging = Staging::begin(&self.staged, tables.clone());
        let res = f(self);
        let staged = staging.finish();

        let val = res?;
        if let Some(staged) = staged {
            *tables = staged;
        }
        Ok(val)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::persistence::contract;

    fn connection() -> MemoryDocuments {
        use r2d2::ManageConnection;
        MemoryConnectionManager::new().connect().expect("connect")
    }

    #[test]
    fn load_missing_document_should_return_none() {
        contract::load_missing_document_should_return_none(&connection());
    }

    #[test]
    fn save_load() {
        contract::save_load(&connection());
    }

    #[test]
    fn should_update_on_overwrite() {
        contract::should_update_on_overwrite(&connection());
    }

    #[test]
    fn should_fail_on_stale_version() {
        contract::should_fail_on_stale_version(&connection());
    }

    #[test]
    fn should_fail_on_overwrite_with_new() {
        contract::should_fail_on_overwrite_with_new(&connection());
    }

    #[test]
    fn should_fail_on_new_document_with_bogus_version() {
        contract::should_fail_on_new_document_with_bogus_version(&connection());
    }

    #[test]
    fn load_all_is_scoped_to_entity() {
        contract::load_all_is_scoped_to_entity(&connection());
    }

    #[test]
    fn find_by_matches_field() {
        contract::find_by_matches_field(&connection());
    }

    #[test]
    fn delete_removes_document() {
        contract::delete_removes_document(&connection());
    }

    #[test]
    fn failed_transaction_rolls_back() {
        contract::failed_transaction_rolls_back(&connection());
    }

    #[test]
    fn transaction_commits_all_writes() {
        contract::transaction_commits_all_writes(&connection());
    }

    #[test]
    fn panicking_transaction_discards_its_copy() {
        let docs = connection();
        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            docs.in_transaction(|_| -> Result<()> { panic!("boom") })
        }));
        assert!(panicked.is_err());
        assert!(docs.staged.borrow().is_none());
    }

    #[test]
    fn connections_share_documents() {
        use r2d2::ManageConnection;
        let manager = MemoryConnectionManager::new();
        let writer = manager.connect().expect("connect");
        let reader = manager.connect().expect("connect");

        let mut doc = contract::Crate::default();
        doc.meta.id = crate::ids::IdGen::new().generate();
        writer.save(&mut doc).expect("save");

        assert_eq!(Some(doc.clone()), reader.load(&doc.meta.id).expect("load"));
    }
}
