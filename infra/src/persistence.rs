use std::cell::Cell;

use anyhow::{anyhow, Context, Result};
use err_derive::Error;
use log::*;
use postgres::rows::Rows;
use postgres::transaction::{self, IsolationLevel};
use r2d2_postgres::PostgresConnectionManager;
use serde::{de::DeserializeOwned, Serialize};

use crate::documents::{HasMeta, Version};
use crate::ids::{Entity, Id};

#[derive(Debug, PartialEq, Eq, Error)]
#[error(display = "stale version")]
pub struct ConcurrencyError;

/// A document store. Every write is checked against the version the caller
/// last saw; `in_transaction` groups writes into one all-or-nothing unit.
pub trait Storage {
    fn setup(&self) -> Result<()>;
    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>>;
    fn load_all<D: DeserializeOwned + Entity>(&self) -> Result<Vec<D>>;
    /// Documents of type `D` whose string value at the JSON `path` equals `value`.
    fn find_by<D: DeserializeOwned + Entity>(&self, path: &[&str], value: &str)
        -> Result<Vec<D>>;
    fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()>;
    fn delete<D: Entity + HasMeta>(&self, document: &D) -> Result<()>;
    /// Runs `f` atomically. Nested calls join the outermost unit of work.
    fn in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
        Self: Sized;
}

#[derive(Debug)]
pub struct Documents {
    connection: postgres::Connection,
    in_transaction: Cell<bool>,
}

#[derive(Debug)]
pub struct DocumentConnectionManager(PostgresConnectionManager);

/// Marks a connection as inside a unit of work until dropped, even when the
/// unit of work panics.
struct Open<'a>(&'a Cell<bool>);

impl<'a> Open<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Open(flag)
    }
}

impl Drop for Open<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

const SETUP_SQL: &str = include_str!("persistence.sql");
const LOAD_SQL: &str = "SELECT body FROM documents WHERE id = $1";
const LOAD_ALL_SQL: &str = "SELECT body FROM documents \
                            WHERE left(id, char_length($1)) = $1 \
                            ORDER BY id";
const FIND_BY_SQL: &str = "SELECT body FROM documents \
                           WHERE left(id, char_length($1)) = $1 \
                           AND body #>> $2 = $3 \
                           ORDER BY id";
const INSERT_SQL: &str = "WITH a as (
                            SELECT $1::jsonb as body
                          )
                          INSERT INTO documents (id, body)
                          SELECT a.body ->> '_id', jsonb_set(a.body, '{_version}', to_jsonb(to_hex(txid_current())))
                          FROM a
                          WHERE NOT EXISTS (
                              SELECT 1 FROM documents d where d.id = a.body ->> '_id'
                          )
                          RETURNING body ->> '_version'";
const UPDATE_SQL: &str = "WITH a as (
                            SELECT $1::jsonb as body
                          )
                          UPDATE documents AS d
                              SET body = jsonb_set(a.body, '{_version}', to_jsonb(to_hex(txid_current())))
                              FROM a
                              WHERE id = a.body ->> '_id'
                              AND d.body -> '_version' = a.body -> '_version'
                          RETURNING d.body ->> '_version'";
const DELETE_SQL: &str = "DELETE FROM documents WHERE id = $1 AND body ->> '_version' = $2";

impl Documents {
    pub fn wrap(connection: postgres::Connection) -> Self {
        Documents {
            connection,
            in_transaction: Cell::new(false),
        }
    }

    pub fn get_ref(&self) -> &postgres::Connection {
        &self.connection
    }

    fn decode<D: DeserializeOwned>(rows: &Rows) -> Result<Vec<D>> {
        rows.iter()
            .map(|row| {
                let json: serde_json::Value = row
                    .get_opt(0)
                    .ok_or_else(|| anyhow!("Missing body column?"))??;
                Ok(serde_json::from_value(json)?)
            })
            .collect()
    }
}

impl Storage for Documents {
    fn setup(&self) -> Result<()> {
        self.connection.batch_execute(SETUP_SQL)?;
        Ok(())
    }

    fn load<D: DeserializeOwned + Entity>(&self, id: &Id<D>) -> Result<Option<D>> {
        let load = self.connection.prepare_cached(LOAD_SQL)?;
        let res = load.query(&[&id.to_string()])?;
        let doc = Self::decode(&res)?.into_iter().next();
        Ok(doc)
    }

    fn load_all<D: DeserializeOwned + Entity>(&self) -> Result<Vec<D>> {
        let load = self.connection.prepare_cached(LOAD_ALL_SQL)?;
        let res = load.query(&[&Id::<D>::prefix()])?;
        let docs = Self::decode(&res)?;
        trace!("Loaded {} {} documents", docs.len(), D::PREFIX);
        Ok(docs)
    }

    fn find_by<D: DeserializeOwned + Entity>(
        &self,
        path: &[&str],
        value: &str,
    ) -> Result<Vec<D>> {
        let path = path.iter().map(|p| p.to_string()).collect::<Vec<String>>();
        let find = self.connection.prepare_cached(FIND_BY_SQL)?;
        let res = find.query(&[&Id::<D>::prefix(), &path, &value])?;
        Self::decode(&res)
    }

    fn save<D: Serialize + Entity + HasMeta>(&self, document: &mut D) -> Result<()> {
        let json = serde_json::to_value(&*document)?;
        let sql = if document.meta().is_new() {
            INSERT_SQL
        } else {
            UPDATE_SQL
        };
        let rows = self.connection.prepare_cached(sql)?.query(&[&json])?;
        debug!("Save of {} returned {} rows", document.meta().id, rows.len());
        if rows.len() != 1 {
            warn!(
                "Save of {} impacted {} rows not 1",
                document.meta().id,
                rows.len()
            );
            return Err(ConcurrencyError.into());
        }
        let version: String = rows
            .get(0)
            .get_opt(0)
            .ok_or_else(|| anyhow!("Missing version column?"))??;
        document.meta_mut().version = Version::from(version);
        Ok(())
    }

    fn delete<D: Entity + HasMeta>(&self, document: &D) -> Result<()> {
        let meta = document.meta();
        let nrows = self
            .connection
            .prepare_cached(DELETE_SQL)?
            .execute(&[&meta.id.to_string(), &meta.version.as_ref()])?;
        if nrows != 1 {
            warn!("Delete of {} impacted {} rows not 1", meta.id, nrows);
            return Err(ConcurrencyError.into());
        }
        Ok(())
    }

    fn in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        if self.in_transaction.get() {
            return f(self);
        }

        // Checks are read-then-insert, so only serializable isolation keeps
        // concurrent writers from each passing on a stale read.
        let mut config = transaction::Config::new();
        config.isolation_level(IsolationLevel::Serializable);
        let t = self
            .connection
            .transaction_with(&config)
            .context("begin")?;
        let res = {
            let _open = Open::enter(&self.in_transaction);
            f(self)
        };

        // Dropping `t` without committing rolls back.
        let val = res?;
        t.commit().context("commit")?;
        Ok(val)
    }
}

impl DocumentConnectionManager {
    pub fn new(manager: PostgresConnectionManager) -> Self {
        DocumentConnectionManager(manager)
    }
}

impl r2d2::ManageConnection for DocumentConnectionManager {
    type Connection = Documents;
    type Error = postgres::Error;

    fn connect(&self) -> Result<Documents, postgres::Error> {
        self.0.connect().map(Documents::wrap)
    }

    fn is_valid(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
        self.0.is_valid(&mut conn.connection)
    }

    fn has_broken(&self, conn: &mut Documents) -> bool {
        self.0.has_broken(&mut conn.connection)
    }
}


#[cfg(test)]
mod test {
    use super::contract;
    use super::*;
    use r2d2::Pool;
    use r2d2_postgres::TlsMode;
    use std::env;

    const DEFAULT_URL: &str = "postgres://postgres@localhost/";

    #[derive(Debug)]
    struct UseTempSchema(String);

    impl r2d2::CustomizeConnection<Documents, postgres::Error> for UseTempSchema {
        fn on_acquire(&self, conn: &mut Documents) -> Result<(), postgres::Error> {
            let conn = conn.get_ref();
            conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", self.0), &[])?;
            conn.execute(&format!("SET search_path TO \"{}\"", self.0), &[])?;
            Ok(())
        }
    }

    fn pool(schema: &str) -> Pool<DocumentConnectionManager> {
        env_logger::try_init().unwrap_or_default();
        let url = env::var("POSTGRES_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        debug!("Build pool for {} in schema {}", url, schema);
        let manager = PostgresConnectionManager::new(&*url, TlsMode::None).expect("postgres");
        let pool = r2d2::Pool::builder()
            .max_size(2)
            .connection_customizer(Box::new(UseTempSchema(schema.to_string())))
            .build(DocumentConnectionManager::new(manager))
            .expect("pool");

        let conn = pool.get().expect("temp connection");
        conn.get_ref()
            .batch_execute("DROP TABLE IF EXISTS documents")
            .expect("drop table");
        conn.setup().expect("setup");

        pool
    }

    macro_rules! postgres_contract {
        ($($name:ident),* $(,)?) => {
            $(
                #[test]
                #[ignore = "needs a postgres server at $POSTGRES_URL"]
                fn $name() {
                    let pool = pool(stringify!($name));
                    let conn = pool.get().expect("temp connection");
                    contract::$name(&*conn);
                }
            )*
        };
    }

    postgres_contract!(
        load_missing_document_should_return_none,
        save_load,
        should_update_on_overwrite,
        should_fail_on_stale_version,
        should_fail_on_overwrite_with_new,
        should_fail_on_new_document_with_bogus_version,
        load_all_is_scoped_to_entity,
        find_by_matches_field,
        delete_removes_document,
        failed_transaction_rolls_back,
        transaction_commits_all_writes,
        panicking_transaction_leaves_connection_usable,
    );

    #[test]
    #[ignore = "needs a postgres server at $POSTGRES_URL"]
    fn concurrent_check_then_insert_cannot_both_commit() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let pool = pool("concurrent_check_then_insert_cannot_both_commit");
        let barrier = Arc::new(Barrier::new(2));
        let writers = vec!["left", "right"]
            .into_iter()
            .map(|label| {
                let pool = pool.clone();
                let barrier = barrier.clone();
                thread::spawn(move || -> Result<()> {
                    let conn = pool.get()?;
                    conn.in_transaction(|t| {
                        let taken = t.find_by::<contract::Crate>(&["shelf"], "only")?;
                        barrier.wait();
                        if taken.is_empty() {
                            let mut doc = contract::Crate::default();
                            doc.meta.id = crate::ids::IdGen::new().generate();
                            doc.label = label.to_string();
                            doc.shelf = Some("only".to_string());
                            t.save(&mut doc)?;
                        }
                        Ok(())
                    })
                })
            })
            .collect::<Vec<_>>();

        let committed = writers
            .into_iter()
            .map(|w| w.join().expect("writer thread"))
            .filter(|res| res.is_ok())
            .count();
        assert_eq!(committed, 1);

        let conn = pool.get().expect("connection");
        let shelved = conn
            .find_by::<contract::Crate>(&["shelf"], "only")
            .expect("find");
        assert_eq!(shelved.len(), 1);
    }
}
