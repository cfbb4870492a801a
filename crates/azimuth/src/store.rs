//! SQLite store: the append-only `event_logs` table and the derived `points` table.
//!
//! Points are only ever written through upserts keyed by `azimuth_number`; nothing here reads
//! a point before writing it.

use crate::abi::RawLogEntry;
use crate::cursor::Cursor;
use crate::point::{AzimuthNumber, Point};
use rusqlite::types::{ToSqlOutput, Type, Value, ValueRef};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row, ToSql, Transaction};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = "
create table if not exists event_logs (
    block_number     integer not null,
    block_hash       blob    not null,
    tx_hash          blob    not null,
    log_index        integer not null,
    contract_address blob    not null,
    topic0           blob    not null,
    topic1           blob    not null,
    topic2           blob    not null,
    data             blob    not null,
    is_processed     integer not null default 0,
    primary key (block_number, log_index)
);
create index if not exists event_logs_unprocessed
    on event_logs (is_processed, block_number, log_index);

create table if not exists points (
    azimuth_number       integer primary key,
    owner_address        blob,
    spawn_address        blob,
    transfer_address     blob,
    management_address   blob,
    voting_address       blob,
    is_active            integer not null default 0,
    has_sponsor          integer not null default 0,
    sponsor              integer not null default 0,
    is_escape_requested  integer not null default 0,
    escape_requested_to  integer not null default 0,
    rift                 integer not null default 0,
    encryption_key       blob,
    auth_key             blob,
    crypto_suite_version integer not null default 0,
    life                 integer not null default 0
);
";

const LOG_COLUMNS: &str = "block_number, block_hash, tx_hash, log_index, contract_address, \
                           topic0, topic1, topic2, data, is_processed";

const POINT_COLUMNS: &str = "azimuth_number, owner_address, spawn_address, transfer_address, \
                             management_address, voting_address, is_active, has_sponsor, sponsor, \
                             is_escape_requested, escape_requested_to, rift, encryption_key, \
                             auth_key, crypto_suite_version, life";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("no event_logs row at {0}")]
    MissingLog(Cursor),
}

/// Writable column of `points`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    OwnerAddress,
    SpawnAddress,
    TransferAddress,
    ManagementAddress,
    VotingAddress,
    IsActive,
    HasSponsor,
    Sponsor,
    IsEscapeRequested,
    EscapeRequestedTo,
    Rift,
    EncryptionKey,
    AuthKey,
    CryptoSuiteVersion,
    Life,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::OwnerAddress => "owner_address",
            Column::SpawnAddress => "spawn_address",
            Column::TransferAddress => "transfer_address",
            Column::ManagementAddress => "management_address",
            Column::VotingAddress => "voting_address",
            Column::IsActive => "is_active",
            Column::HasSponsor => "has_sponsor",
            Column::Sponsor => "sponsor",
            Column::IsEscapeRequested => "is_escape_requested",
            Column::EscapeRequestedTo => "escape_requested_to",
            Column::Rift => "rift",
            Column::EncryptionKey => "encryption_key",
            Column::AuthKey => "auth_key",
            Column::CryptoSuiteVersion => "crypto_suite_version",
            Column::Life => "life",
        }
    }

    /// Named parameter bound to this column in upsert statements.
    pub fn param(self) -> &'static str {
        match self {
            Column::OwnerAddress => ":owner_address",
            Column::SpawnAddress => ":spawn_address",
            Column::TransferAddress => ":transfer_address",
            Column::ManagementAddress => ":management_address",
            Column::VotingAddress => ":voting_address",
            Column::IsActive => ":is_active",
            Column::HasSponsor => ":has_sponsor",
            Column::Sponsor => ":sponsor",
            Column::IsEscapeRequested => ":is_escape_requested",
            Column::EscapeRequestedTo => ":escape_requested_to",
            Column::Rift => ":rift",
            Column::EncryptionKey => ":encryption_key",
            Column::AuthKey => ":auth_key",
            Column::CryptoSuiteVersion => ":crypto_suite_version",
            Column::Life => ":life",
        }
    }
}

/// Value bound to a point column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    U32(u32),
    Address([u8; 20]),
    Bytes32([u8; 32]),
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            FieldValue::U32(n) => ToSqlOutput::Owned(Value::Integer(i64::from(*n))),
            FieldValue::Address(a) => ToSqlOutput::Borrowed(ValueRef::Blob(&a[..])),
            FieldValue::Bytes32(b) => ToSqlOutput::Borrowed(ValueRef::Blob(&b[..])),
        })
    }
}

/// Statement template for an upsert of `columns` into `points`.
///
/// Inserts the row if absent, else overwrites only `columns`. With no columns the row is only
/// created.
pub fn upsert_statement(columns: &[Column]) -> String {
    let mut names = vec!["azimuth_number"];
    let mut params = vec![":azimuth_number"];
    names.extend(columns.iter().map(|c| c.name()));
    params.extend(columns.iter().map(|c| c.param()));

    if columns.is_empty() {
        format!(
            "insert into points ({}) values ({}) on conflict (azimuth_number) do nothing",
            names.join(", "),
            params.join(", ")
        )
    } else {
        let updates: Vec<String> = columns
            .iter()
            .map(|c| format!("{0} = excluded.{0}", c.name()))
            .collect();
        format!(
            "insert into points ({}) values ({}) on conflict (azimuth_number) do update set {}",
            names.join(", "),
            params.join(", "),
            updates.join(", ")
        )
    }
}

/// Handle to the replay database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create both tables if absent. Safe to call repeatedly.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Raw connection, for readers of the derived tables.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Append one raw log entry. It is always stored unprocessed, whatever its flag says.
    pub fn save(&self, entry: &RawLogEntry) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "insert into event_logs ({LOG_COLUMNS}) values (
                    :block_number, :block_hash, :tx_hash, :log_index, :contract_address,
                    :topic0, :topic1, :topic2, :data, :is_processed
                )"
            ),
            named_params! {
                ":block_number": entry.block_number,
                ":block_hash": &entry.block_hash[..],
                ":tx_hash": &entry.tx_hash[..],
                ":log_index": entry.log_index,
                ":contract_address": &entry.contract_address[..],
                ":topic0": &entry.topic0[..],
                ":topic1": &entry.topic1[..],
                ":topic2": &entry.topic2[..],
                ":data": &entry.data,
                ":is_processed": false,
            },
        )?;
        Ok(())
    }

    /// Up to `limit` unprocessed entries in `(block_number, log_index)` order.
    pub fn unprocessed(&self, limit: usize) -> Result<Vec<RawLogEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&format!(
            "select {LOG_COLUMNS} from event_logs where is_processed = 0
             order by block_number asc, log_index asc limit ?1"
        ))?;
        let rows = stmt.query_map(params![limit], log_from_row)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn unprocessed_count(&self) -> Result<u64, StoreError> {
        let n: u64 = self.conn.query_row(
            "select count(*) from event_logs where is_processed = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn point(&self, number: AzimuthNumber) -> Result<Option<Point>, StoreError> {
        let point = self
            .conn
            .query_row(
                &format!("select {POINT_COLUMNS} from points where azimuth_number = ?1"),
                params![number.0],
                point_from_row,
            )
            .optional()?;
        Ok(point)
    }

    /// Every point, ordered by number.
    pub fn points(&self) -> Result<Vec<Point>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "select {POINT_COLUMNS} from points order by azimuth_number asc"
        ))?;
        let rows = stmt.query_map([], point_from_row)?;
        let points = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Open a transaction scoped to one replay batch.
    pub fn begin(&mut self) -> Result<StoreTx<'_>, StoreError> {
        let tx = self.conn.transaction()?;
        Ok(StoreTx { tx })
    }
}

/// Transaction over one batch. Dropping it without [StoreTx::commit] rolls back.
pub struct StoreTx<'a> {
    tx: Transaction<'a>,
}

impl StoreTx<'_> {
    /// Execute one point upsert.
    pub fn upsert(
        &self,
        number: AzimuthNumber,
        statement: &str,
        values: &[(Column, FieldValue)],
    ) -> Result<(), StoreError> {
        let mut stmt = self.tx.prepare_cached(statement)?;
        let number = number.0;
        let mut bindings: Vec<(&str, &dyn ToSql)> = Vec::with_capacity(values.len() + 1);
        bindings.push((":azimuth_number", &number as &dyn ToSql));
        bindings.extend(values.iter().map(|(c, v)| (c.param(), v as &dyn ToSql)));
        stmt.execute(bindings.as_slice())?;
        Ok(())
    }

    pub fn mark_processed(&self, at: Cursor) -> Result<(), StoreError> {
        let updated = self.tx.execute(
            "update event_logs set is_processed = 1
             where block_number = :block_number and log_index = :log_index",
            named_params! {
                ":block_number": at.block_number,
                ":log_index": at.log_index,
            },
        )?;
        if updated == 0 {
            return Err(StoreError::MissingLog(at));
        }
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<RawLogEntry> {
    Ok(RawLogEntry {
        block_number: row.get(0)?,
        block_hash: blob_array(row, 1)?,
        tx_hash: blob_array(row, 2)?,
        log_index: row.get(3)?,
        contract_address: blob_array(row, 4)?,
        topic0: blob_array(row, 5)?,
        topic1: blob_array(row, 6)?,
        topic2: blob_array(row, 7)?,
        data: row.get(8)?,
        is_processed: row.get(9)?,
    })
}

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<Point> {
    Ok(Point {
        azimuth_number: AzimuthNumber(row.get(0)?),
        owner_address: nullable_blob_array(row, 1)?,
        spawn_address: nullable_blob_array(row, 2)?,
        transfer_address: nullable_blob_array(row, 3)?,
        management_address: nullable_blob_array(row, 4)?,
        voting_address: nullable_blob_array(row, 5)?,
        is_active: row.get(6)?,
        has_sponsor: row.get(7)?,
        sponsor: AzimuthNumber(row.get(8)?),
        is_escape_requested: row.get(9)?,
        escape_requested_to: AzimuthNumber(row.get(10)?),
        rift: row.get(11)?,
        encryption_key: nullable_blob_array(row, 12)?,
        auth_key: nullable_blob_array(row, 13)?,
        crypto_suite_version: row.get(14)?,
        life: row.get(15)?,
    })
}

fn blob_array<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    to_array(idx, bytes)
}

fn nullable_blob_array<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    match row.get::<_, Option<Vec<u8>>>(idx)? {
        Some(bytes) => to_array(idx, bytes),
        None => Ok([0u8; N]),
    }
}

fn to_array<const N: usize>(idx: usize, bytes: Vec<u8>) -> rusqlite::Result<[u8; N]> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("expected {} bytes, got {}", N, len).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(block_number: u64, log_index: u64) -> RawLogEntry {
        RawLogEntry {
            block_number,
            block_hash: [1; 32],
            tx_hash: [2; 32],
            log_index,
            contract_address: [3; 20],
            topic0: [4; 32],
            topic1: [5; 32],
            topic2: [6; 32],
            data: vec![7; 64],
            is_processed: false,
        }
    }

    #[test]
    fn upsert_statement_shapes() {
        assert_eq!(
            upsert_statement(&[]),
            "insert into points (azimuth_number) values (:azimuth_number) \
             on conflict (azimuth_number) do nothing"
        );
        assert_eq!(
            upsert_statement(&[Column::Rift]),
            "insert into points (azimuth_number, rift) values (:azimuth_number, :rift) \
             on conflict (azimuth_number) do update set rift = excluded.rift"
        );
    }

    #[test]
    fn save_and_read_back_in_order() {
        let store = Store::open_in_memory().unwrap();
        store.save(&entry(2, 0)).unwrap();
        store.save(&entry(1, 5)).unwrap();
        store.save(&entry(1, 1)).unwrap();

        let got = store.unprocessed(10).unwrap();
        let positions: Vec<Cursor> = got.iter().map(|e| e.position()).collect();
        assert_eq!(
            positions,
            vec![Cursor::new(1, 1), Cursor::new(1, 5), Cursor::new(2, 0)]
        );
        assert_eq!(got[0], entry(1, 1));
        assert_eq!(store.unprocessed(2).unwrap().len(), 2);
        assert_eq!(store.unprocessed_count().unwrap(), 3);
    }

    #[test]
    fn save_ignores_incoming_processed_flag() {
        let catalog = crate::catalog::EventCatalog::new();
        let mut activated = entry(1, 0);
        activated.topic0 = catalog.fingerprint_of(crate::catalog::EventKind::Activated);
        activated.topic1 = [0; 32];
        activated.topic1[31] = 0x42;
        activated.data.clear();
        activated.is_processed = true;

        let mut store = Store::open_in_memory().unwrap();
        store.save(&activated).unwrap();
        assert_eq!(store.unprocessed_count().unwrap(), 1);
        assert!(!store.unprocessed(1).unwrap()[0].is_processed);

        let report = crate::replay::ReplayEngine::with_batch_size(catalog, 10)
            .replay_all(&mut store)
            .unwrap();
        assert_eq!(report.entries, 1);
        let p = store.point(AzimuthNumber(0x42)).unwrap().expect("point applied");
        assert!(p.is_active);
    }

    #[test]
    fn duplicate_save_fails() {
        let store = Store::open_in_memory().unwrap();
        store.save(&entry(1, 1)).unwrap();
        assert!(matches!(store.save(&entry(1, 1)), Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn init_schema_is_repeatable() {
        let store = Store::open_in_memory().unwrap();
        store.save(&entry(1, 1)).unwrap();
        store.init_schema().unwrap();
        assert_eq!(store.unprocessed_count().unwrap(), 1);
    }

    #[test]
    fn upsert_touches_only_named_columns() {
        let mut store = Store::open_in_memory().unwrap();
        let n = AzimuthNumber(0x100);
        let tx = store.begin().unwrap();
        tx.upsert(
            n,
            &upsert_statement(&[Column::OwnerAddress]),
            &[(Column::OwnerAddress, FieldValue::Address([9; 20]))],
        )
        .unwrap();
        tx.upsert(
            n,
            &upsert_statement(&[Column::Rift]),
            &[(Column::Rift, FieldValue::U32(3))],
        )
        .unwrap();
        tx.commit().unwrap();

        let p = store.point(n).unwrap().unwrap();
        assert_eq!(p.owner_address, [9; 20]);
        assert_eq!(p.rift, 3);
        assert_eq!(p.spawn_address, [0; 20]);
        assert!(!p.is_active);
        assert_eq!(store.point(AzimuthNumber(1)).unwrap(), None);
    }

    #[test]
    fn rolled_back_tx_leaves_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        store.save(&entry(1, 1)).unwrap();
        let tx = store.begin().unwrap();
        tx.upsert(AzimuthNumber(5), &upsert_statement(&[]), &[]).unwrap();
        tx.mark_processed(Cursor::new(1, 1)).unwrap();
        tx.rollback().unwrap();

        assert!(store.points().unwrap().is_empty());
        assert_eq!(store.unprocessed_count().unwrap(), 1);
    }

    #[test]
    fn mark_processed_requires_existing_row() {
        let mut store = Store::open_in_memory().unwrap();
        let tx = store.begin().unwrap();
        assert!(matches!(
            tx.mark_processed(Cursor::new(9, 9)),
            Err(StoreError::MissingLog(c)) if c == Cursor::new(9, 9)
        ));
    }
}
