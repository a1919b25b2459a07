//! Single writer draining the conflict channel into one round's tables.
//!
//! Inserts run inside explicit transactions committed every
//! `COMMIT_EVERY_KEYS` conflict keys. On the final round each conflict is
//! additionally written to `FINAL_RESULT` and, when configured, appended
//! to the flat result file as `<db>\t<conflict>\t<key>\t<field>`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crossbeam_channel::Receiver;

use respdiff_core::{KeyRecord, StorageError};

use crate::result_db::ResultDb;

/// Conflict keys per transaction commit.
pub const COMMIT_EVERY_KEYS: usize = 1000;

/// Totals reported when the writer finishes a round.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterStats {
    pub keys: usize,
    pub fields: usize,
}

/// Drains one round's conflict channel into the result store.
pub struct ConflictWriter {
    db: ResultDb,
    instance_a: String,
    instance_b: String,
    final_round: bool,
    result_file: Option<BufWriter<File>>,
}

impl ConflictWriter {
    /// `result_file` is only honoured on the final round; it is truncated
    /// before the first conflict lands.
    pub fn new(
        db: ResultDb,
        instance_a: String,
        instance_b: String,
        final_round: bool,
        result_file: Option<&Path>,
    ) -> Result<Self, StorageError> {
        let result_file = match result_file {
            Some(path) if final_round => {
                let file = File::create(path).map_err(|e| StorageError::ResultFile {
                    message: format!("create {}: {e}", path.display()),
                })?;
                Some(BufWriter::new(file))
            }
            _ => None,
        };

        Ok(Self {
            db,
            instance_a,
            instance_b,
            final_round,
            result_file,
        })
    }

    /// Consume the channel until every verifier has hung up, then commit
    /// the tail transaction.
    pub fn drain(mut self, conflicts: Receiver<KeyRecord>) -> Result<WriterStats, StorageError> {
        let mut stats = WriterStats::default();

        self.db.begin()?;
        for record in conflicts {
            if stats.keys != 0 && stats.keys % COMMIT_EVERY_KEYS == 0 {
                self.db.commit()?;
                self.db.begin()?;
            }
            self.write_one(&record, &mut stats)?;
        }
        self.db.commit()?;

        if let Some(file) = &mut self.result_file {
            file.flush().map_err(|e| StorageError::ResultFile {
                message: e.to_string(),
            })?;
        }

        tracing::debug!(
            round = self.db.round(),
            keys = stats.keys,
            fields = stats.fields,
            "conflict writer finished"
        );
        Ok(stats)
    }

    fn write_one(&mut self, record: &KeyRecord, stats: &mut WriterStats) -> Result<(), StorageError> {
        let key_id = self.db.insert_key(record)?;
        stats.keys += 1;

        let key_text = record.key_display();
        if record.fields.is_empty() {
            if self.final_round {
                self.db.insert_final(
                    &self.instance_a,
                    &self.instance_b,
                    &key_text,
                    record.db,
                    record.conflict,
                    "",
                )?;
                self.append_result_line(record.db, record.conflict.name(), &key_text, "")?;
            }
        } else {
            for field in &record.fields {
                self.db.insert_field(key_id, field)?;
                stats.fields += 1;

                if self.final_round {
                    let field_text = String::from_utf8_lossy(&field.field).into_owned();
                    self.db.insert_final(
                        &self.instance_a,
                        &self.instance_b,
                        &key_text,
                        record.db,
                        field.conflict,
                        &field_text,
                    )?;
                    self.append_result_line(record.db, field.conflict.name(), &key_text, &field_text)?;
                }
            }
        }
        Ok(())
    }

    fn append_result_line(
        &mut self,
        db: i32,
        conflict: &str,
        key: &str,
        field: &str,
    ) -> Result<(), StorageError> {
        let Some(file) = &mut self.result_file else {
            return Ok(());
        };
        writeln!(file, "{db}\t{conflict}\t{key}\t{field}").map_err(|e| StorageError::ResultFile {
            message: e.to_string(),
        })
    }
}
