//! One round's result database.
//!
//! Non-final rounds write `key_<r>` / `field_<r>`; the final round writes
//! the canonical `key` / `field` tables plus one `FINAL_RESULT` row per
//! reported conflict. All text columns carry opaque key/field bytes
//! encoded as text.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use respdiff_core::{ConflictKind, FieldRecord, KeyRecord, StorageError, ValueType};

fn sqlite_err(e: rusqlite::Error) -> StorageError {
    StorageError::Sqlite {
        message: e.to_string(),
    }
}

/// Table names for round `round` out of `total_rounds`.
fn table_names(round: u32, total_rounds: u32) -> (String, String) {
    if round == total_rounds {
        ("key".to_string(), "field".to_string())
    } else {
        (format!("key_{round}"), format!("field_{round}"))
    }
}

/// Handle on the database file of one round.
pub struct ResultDb {
    conn: Connection,
    key_table: String,
    field_table: String,
    round: u32,
}

impl ResultDb {
    /// The on-disk path for one round's database.
    pub fn path_for_round(db_file: &Path, round: u32) -> PathBuf {
        let mut name = db_file.as_os_str().to_os_string();
        name.push(format!(".{round}"));
        PathBuf::from(name)
    }

    /// Create round `round`'s database, removing any pre-existing file,
    /// and create its tables.
    pub fn create(db_file: &Path, round: u32, total_rounds: u32) -> Result<Self, StorageError> {
        let path = Self::path_for_round(db_file, round);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| StorageError::Sqlite {
                message: format!("remove stale {}: {e}", path.display()),
            })?;
        }

        let conn = Connection::open(&path).map_err(sqlite_err)?;
        let (key_table, field_table) = table_names(round, total_rounds);

        conn.execute_batch(&format!(
            "CREATE TABLE {key_table}(
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                key            TEXT NOT NULL,
                type           TEXT NOT NULL,
                conflict_type  TEXT NOT NULL,
                db             INTEGER NOT NULL,
                source_len     INTEGER NOT NULL,
                target_len     INTEGER NOT NULL
            );
            CREATE TABLE {field_table}(
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                field          TEXT NOT NULL,
                conflict_type  TEXT NOT NULL,
                key_id         INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS FINAL_RESULT(
                InstanceA        TEXT NOT NULL,
                InstanceB        TEXT NOT NULL,
                Key              TEXT NOT NULL,
                Schema           TEXT NOT NULL,
                InconsistentType TEXT NOT NULL,
                Extra            TEXT NOT NULL
            );"
        ))
        .map_err(sqlite_err)?;

        Ok(Self {
            conn,
            key_table,
            field_table,
            round,
        })
    }

    /// Open a previously written round for reading.
    pub fn open(db_file: &Path, round: u32, total_rounds: u32) -> Result<Self, StorageError> {
        let path = Self::path_for_round(db_file, round);
        let conn = Connection::open(&path).map_err(sqlite_err)?;
        let (key_table, field_table) = table_names(round, total_rounds);
        Ok(Self {
            conn,
            key_table,
            field_table,
            round,
        })
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn begin(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("BEGIN").map_err(sqlite_err)
    }

    pub fn commit(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT").map_err(sqlite_err)
    }

    /// Insert one conflict key row; returns its surrogate id for the
    /// field rows.
    pub fn insert_key(&self, record: &KeyRecord) -> Result<i64, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "INSERT INTO {} (key, type, conflict_type, db, source_len, target_len)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                self.key_table
            ))
            .map_err(sqlite_err)?;
        stmt.execute(rusqlite::params![
            record.key_display(),
            record.value_type.name(),
            record.conflict.name(),
            record.db,
            record.source.item_count,
            record.target.item_count,
        ])
        .map_err(sqlite_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_field(&self, key_id: i64, field: &FieldRecord) -> Result<(), StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!(
                "INSERT INTO {} (field, conflict_type, key_id) VALUES (?1, ?2, ?3)",
                self.field_table
            ))
            .map_err(sqlite_err)?;
        stmt.execute(rusqlite::params![
            String::from_utf8_lossy(&field.field).into_owned(),
            field.conflict.name(),
            key_id,
        ])
        .map_err(sqlite_err)?;
        Ok(())
    }

    /// One consolidated row of the terminal round's report.
    pub fn insert_final(
        &self,
        instance_a: &str,
        instance_b: &str,
        key: &str,
        db: i32,
        kind: ConflictKind,
        extra: &str,
    ) -> Result<(), StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "INSERT INTO FINAL_RESULT (InstanceA, InstanceB, Key, Schema, InconsistentType, Extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(sqlite_err)?;
        stmt.execute(rusqlite::params![
            instance_a,
            instance_b,
            key,
            db.to_string(),
            kind.name(),
            extra,
        ])
        .map_err(sqlite_err)?;
        Ok(())
    }

    /// Read the next batch of conflict keys for `db`, ordered by surrogate
    /// id, starting after `after_id`. Returns the reconstructed records
    /// and the last id seen (unchanged when the table is exhausted).
    ///
    /// A row that reads back as `unknown` type or `unset` conflict is a
    /// corrupt table and fails the run.
    pub fn read_prior_batch(
        &self,
        db: i32,
        after_id: i64,
        limit: usize,
    ) -> Result<(Vec<KeyRecord>, i64), StorageError> {
        let mut key_stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT id, key, type, conflict_type, source_len, target_len
                 FROM {} WHERE id > ?1 AND db = ?2 ORDER BY id LIMIT ?3",
                self.key_table
            ))
            .map_err(sqlite_err)?;
        let mut field_stmt = self
            .conn
            .prepare_cached(&format!(
                "SELECT field, conflict_type FROM {} WHERE key_id = ?1 ORDER BY id",
                self.field_table
            ))
            .map_err(sqlite_err)?;

        let mut last_id = after_id;
        let mut records = Vec::with_capacity(limit);

        let rows = key_stmt
            .query_map(rusqlite::params![after_id, db, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(sqlite_err)?;

        for row in rows {
            let (id, key, type_name, conflict_name, source_len, target_len) =
                row.map_err(sqlite_err)?;

            let value_type = ValueType::from_wire(&type_name);
            let conflict = ConflictKind::from_name(&conflict_name);
            if value_type == ValueType::Unknown {
                return Err(StorageError::CorruptRow {
                    table: self.key_table.clone(),
                    details: format!("key `{key}` has invalid type `{type_name}`"),
                });
            }
            if conflict == ConflictKind::Unset {
                return Err(StorageError::CorruptRow {
                    table: self.key_table.clone(),
                    details: format!("key `{key}` has invalid conflict `{conflict_name}`"),
                });
            }

            let mut record = KeyRecord::scanned(key.into_bytes(), db);
            record.value_type = value_type;
            record.conflict = conflict;
            record.source.item_count = source_len;
            record.target.item_count = target_len;

            if value_type != ValueType::String {
                let fields = field_stmt
                    .query_map(rusqlite::params![id], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })
                    .map_err(sqlite_err)?;
                for field in fields {
                    let (field, conflict_name) = field.map_err(sqlite_err)?;
                    let conflict = ConflictKind::from_name(&conflict_name);
                    if conflict == ConflictKind::Unset {
                        return Err(StorageError::CorruptRow {
                            table: self.field_table.clone(),
                            details: format!("field `{field}` has invalid conflict `{conflict_name}`"),
                        });
                    }
                    record
                        .fields
                        .push(FieldRecord::new(field.into_bytes(), conflict));
                }
            }

            last_id = last_id.max(id);
            records.push(record);
        }

        Ok((records, last_id))
    }

    /// Row count of the conflict-key table (diagnostics and tests).
    pub fn count_keys(&self) -> Result<i64, StorageError> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.key_table), [], |row| {
                row.get(0)
            })
            .map_err(sqlite_err)
    }

    /// Row count of the FINAL_RESULT table.
    pub fn count_final(&self) -> Result<i64, StorageError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM FINAL_RESULT", [], |row| row.get(0))
            .map_err(sqlite_err)
    }
}
