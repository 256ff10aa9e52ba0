use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, Table, WriteTransaction};
use std::path::Path;
use thiserror::Error;

use super::models::{PresenceCheck, Service, Token};
use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

pub struct Database {
    db: RedbDatabase,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("queue-manager.redb");
        let db = RedbDatabase::create(db_path)?;

        // Create tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SERVICES)?;
            let _ = write_txn.open_table(TOKENS)?;
            let _ = write_txn.open_table(SERVICE_TOKENS)?;
            let _ = write_txn.open_table(USER_TOKENS)?;
            let _ = write_txn.open_table(PRESENCE_CHECKS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    // ========================================================================
    // Service operations
    // ========================================================================

    /// Store a service definition (admin surface / test seeding)
    pub fn put_service(&self, service: &Service) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SERVICES)?;
            let data = bincode::serialize(service)?;
            table.insert(service.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a service by ID
    pub fn get_service(&self, service_id: &str) -> Result<Option<Service>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SERVICES)?;
        read_service(&table, service_id)
    }

    /// Get all services (for sweeps)
    pub fn get_all_services(&self) -> Result<Vec<Service>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SERVICES)?;

        let mut services = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            services.push(bincode::deserialize(value.value())?);
        }

        Ok(services)
    }

    // ========================================================================
    // Token operations
    // ========================================================================

    /// Get a token by ID
    pub fn get_token(&self, token_id: &str) -> Result<Option<Token>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;
        read_token(&table, token_id)
    }

    /// Get all tokens (for sweeps)
    pub fn get_all_tokens(&self) -> Result<Vec<Token>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TOKENS)?;

        let mut tokens = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            tokens.push(bincode::deserialize(value.value())?);
        }

        Ok(tokens)
    }

    /// Get all tokens for a service, via the secondary index
    pub fn tokens_by_service(&self, service_id: &str) -> Result<Vec<Token>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(SERVICE_TOKENS)?;
        let tokens_table = read_txn.open_table(TOKENS)?;

        let mut tokens = Vec::new();
        for token_id in index_ids(&index_table, service_id)? {
            if let Some(token) = read_token(&tokens_table, &token_id)? {
                tokens.push(token);
            }
        }

        Ok(tokens)
    }

    /// Get all tokens for a user, via the secondary index
    pub fn tokens_by_user(&self, user_id: &str) -> Result<Vec<Token>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(USER_TOKENS)?;
        let tokens_table = read_txn.open_table(TOKENS)?;

        let mut tokens = Vec::new();
        for token_id in index_ids(&index_table, user_id)? {
            if let Some(token) = read_token(&tokens_table, &token_id)? {
                tokens.push(token);
            }
        }

        Ok(tokens)
    }

    // ========================================================================
    // Presence check operations
    // ========================================================================

    /// Append an immutable presence check record to a token's history
    pub fn append_presence_check(
        &self,
        token_id: &str,
        check: &PresenceCheck,
    ) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PRESENCE_CHECKS)?;
            let mut checks: Vec<PresenceCheck> = table
                .get(token_id)?
                .map(|v| bincode::deserialize(v.value()).unwrap_or_default())
                .unwrap_or_default();
            checks.push(check.clone());
            let data = bincode::serialize(&checks)?;
            table.insert(token_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All recorded presence checks for a token, oldest first
    pub fn presence_checks(&self, token_id: &str) -> Result<Vec<PresenceCheck>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PRESENCE_CHECKS)?;

        match table.get(token_id)? {
            Some(data) => Ok(bincode::deserialize(data.value())?),
            None => Ok(Vec::new()),
        }
    }

    /// The most recent presence check for a token, if any
    pub fn latest_presence_check(
        &self,
        token_id: &str,
    ) -> Result<Option<PresenceCheck>, DatabaseError> {
        Ok(self.presence_checks(token_id)?.pop())
    }

    // ========================================================================
    // Admin operations
    // ========================================================================

    /// Purge all data - for testing only
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut stats = PurgeStats::default();

        stats.tokens = clear_table(&write_txn, TOKENS)?;
        stats.services = clear_table(&write_txn, SERVICES)?;
        stats.presence_checks = clear_table(&write_txn, PRESENCE_CHECKS)?;
        clear_table(&write_txn, SERVICE_TOKENS)?;
        clear_table(&write_txn, USER_TOKENS)?;

        write_txn.commit()?;
        Ok(stats)
    }
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub presence_checks: u64,
    pub services: u64,
    pub tokens: u64,
}

fn clear_table(
    write_txn: &WriteTransaction,
    def: redb::TableDefinition<&'static str, &'static [u8]>,
) -> Result<u64, DatabaseError> {
    // Collect keys first, then remove
    let table = write_txn.open_table(def)?;
    let keys: Vec<String> = table
        .iter()?
        .map(|r| r.map(|(k, _)| k.value().to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    drop(table);

    let mut table = write_txn.open_table(def)?;
    let mut cleared = 0u64;
    for key in keys {
        table.remove(key.as_str())?;
        cleared += 1;
    }
    Ok(cleared)
}

// ============================================================================
// Table helpers shared with the queue module's multi-step transactions
// ============================================================================

pub(crate) fn read_token(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    token_id: &str,
) -> Result<Option<Token>, DatabaseError> {
    match table.get(token_id)? {
        Some(data) => Ok(Some(bincode::deserialize(data.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn write_token(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    token: &Token,
) -> Result<(), DatabaseError> {
    let data = bincode::serialize(token)?;
    table.insert(token.id.as_str(), data.as_slice())?;
    Ok(())
}

pub(crate) fn read_service(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    service_id: &str,
) -> Result<Option<Service>, DatabaseError> {
    match table.get(service_id)? {
        Some(data) => Ok(Some(bincode::deserialize(data.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn write_service(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    service: &Service,
) -> Result<(), DatabaseError> {
    let data = bincode::serialize(service)?;
    table.insert(service.id.as_str(), data.as_slice())?;
    Ok(())
}

pub(crate) fn index_ids(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Vec<String>, DatabaseError> {
    match table.get(key)? {
        Some(data) => Ok(bincode::deserialize(data.value())?),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn push_index(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    id: &str,
) -> Result<(), DatabaseError> {
    let mut ids: Vec<String> = table
        .get(key)?
        .map(|v| bincode::deserialize(v.value()).unwrap_or_default())
        .unwrap_or_default();

    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
        let data = bincode::serialize(&ids)?;
        table.insert(key, data.as_slice())?;
    }
    Ok(())
}
