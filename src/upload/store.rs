//! §4.D upload bookkeeping: one `upload` table per id-database file, shared
//! with [`crate::id::IdStore`] (spec §6 "Storage layout").
//!
//! Grounded on `examples/original_source/tupimage/id_manager.py`
//! (`UploadInfo`, `get_upload_info`, `needs_uploading`, `mark_uploaded`,
//! `cleanup_uploads`), generalized to carry the `UPLOADING`/`UPLOADED`/
//! `DIRTY` status the richer coordinator protocol needs.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

pub(crate) fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Uploaded,
    Dirty,
}

impl UploadStatus {
    fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Uploading => "UPLOADING",
            UploadStatus::Uploaded => "UPLOADED",
            UploadStatus::Dirty => "DIRTY",
        }
    }

    fn parse(s: &str) -> UploadStatus {
        match s {
            "UPLOADING" => UploadStatus::Uploading,
            "UPLOADED" => UploadStatus::Uploaded,
            _ => UploadStatus::Dirty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub image_id: u32,
    pub terminal_id: String,
    pub description: String,
    pub size_bytes: u64,
    pub upload_time: i64,
    pub status: UploadStatus,
    /// Bytes uploaded to this terminal since (and including) this entry.
    pub bytes_ago: u64,
    /// Number of uploads to this terminal since (and including) this entry.
    pub uploads_ago: u64,
}

pub struct UploadStore {
    conn: Connection,
}

impl UploadStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS upload (
                image_id INTEGER NOT NULL,
                terminal_id TEXT NOT NULL,
                description TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                upload_time INTEGER NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (image_id, terminal_id)
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    pub fn get_upload_info(&self, image_id: u32, terminal_id: &str) -> Result<Option<UploadInfo>> {
        let row: Option<(String, u64, i64, String)> = self
            .conn
            .query_row(
                "SELECT description, size_bytes, upload_time, status FROM upload
                 WHERE image_id = ?1 AND terminal_id = ?2",
                params![image_id, terminal_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get::<_, i64>(1)? as u64,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((description, size_bytes, upload_time, status)) = row else {
            return Ok(None);
        };

        let (count, sum): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), SUM(size_bytes) FROM upload
             WHERE terminal_id = ?1 AND upload_time > ?2",
            params![terminal_id, upload_time],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(Some(UploadInfo {
            image_id,
            terminal_id: terminal_id.to_string(),
            description,
            size_bytes,
            upload_time,
            status: UploadStatus::parse(&status),
            bytes_ago: size_bytes + sum.unwrap_or(0) as u64,
            uploads_ago: 1 + count as u64,
        }))
    }

    /// Every terminal's upload record for `image_id` (spec §6 "`list`
    /// verbose mode"), each with its own `bytes_ago`/`uploads_ago` computed
    /// against that terminal's own upload history.
    pub fn get_upload_infos(&self, image_id: u32) -> Result<Vec<UploadInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT terminal_id FROM upload WHERE image_id = ?1")?;
        let terminal_ids: Vec<String> = stmt
            .query_map(params![image_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        let mut infos = Vec::with_capacity(terminal_ids.len());
        for terminal_id in terminal_ids {
            if let Some(info) = self.get_upload_info(image_id, &terminal_id)? {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    /// Claim the `(image_id, terminal_id)` slot as `UPLOADING`, or report
    /// the existing record so the coordinator can decide whether to wait,
    /// return early, or steal the claim. Runs inside its own transaction
    /// (spec §4.D step 1-2), so calling this *is* "open a write
    /// transaction, inspect, and upsert" in one atomic step.
    pub fn claim_uploading(
        &mut self,
        image_id: u32,
        terminal_id: &str,
        description: &str,
        size_bytes: u64,
    ) -> Result<Option<UploadInfo>> {
        let tx = self.conn.transaction()?;
        let existing: Option<(String, i64, String)> = tx
            .query_row(
                "SELECT description, upload_time, status FROM upload
                 WHERE image_id = ?1 AND terminal_id = ?2",
                params![image_id, terminal_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let info = existing.map(|(description, upload_time, status)| UploadInfo {
            image_id,
            terminal_id: terminal_id.to_string(),
            description,
            size_bytes: 0,
            upload_time,
            status: UploadStatus::parse(&status),
            bytes_ago: 0,
            uploads_ago: 0,
        });

        tx.execute(
            "INSERT INTO upload (image_id, terminal_id, description, size_bytes, upload_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(image_id, terminal_id) DO UPDATE SET
                description = excluded.description,
                size_bytes = excluded.size_bytes,
                upload_time = excluded.upload_time,
                status = excluded.status",
            params![
                image_id,
                terminal_id,
                description,
                size_bytes as i64,
                now_epoch(),
                UploadStatus::Uploading.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(info)
    }

    pub fn set_status(
        &mut self,
        image_id: u32,
        terminal_id: &str,
        status: UploadStatus,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE upload SET status = ?1, upload_time = ?2
             WHERE image_id = ?3 AND terminal_id = ?4",
            params![status.as_str(), now_epoch(), image_id, terminal_id],
        )?;
        Ok(())
    }

    pub fn touch_upload_time(&mut self, image_id: u32, terminal_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE upload SET upload_time = ?1 WHERE image_id = ?2 AND terminal_id = ?3",
            params![now_epoch(), image_id, terminal_id],
        )?;
        Ok(())
    }

    /// Drop the upload record of `image_id` for every terminal, reverting
    /// it to "no record" (spec §4.D "no record" state, used by `forget`).
    pub fn forget(&mut self, image_id: u32) -> Result<()> {
        self.conn
            .execute("DELETE FROM upload WHERE image_id = ?1", params![image_id])?;
        Ok(())
    }

    /// Drop the `(image_id, terminal_id)` record only, reverting just that
    /// pair to "no record". Used to release a stale `UPLOADING` claim after
    /// a failed transmit without disturbing other terminals' records for
    /// the same id (spec §4.D "clear the UPLOADING claim").
    pub fn forget_for_terminal(&mut self, image_id: u32, terminal_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM upload WHERE image_id = ?1 AND terminal_id = ?2",
            params![image_id, terminal_id],
        )?;
        Ok(())
    }

    pub fn cleanup(&mut self, max_uploads: u64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM upload WHERE (image_id, terminal_id) NOT IN (
                SELECT image_id, terminal_id FROM upload
                ORDER BY upload_time DESC LIMIT ?1
            )",
            params![max_uploads as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_ago_and_uploads_ago_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        store.claim_uploading(1, "term", "d1", 100).unwrap();
        store.set_status(1, "term", UploadStatus::Uploaded).unwrap();
        store.claim_uploading(2, "term", "d2", 200).unwrap();
        store.set_status(2, "term", UploadStatus::Uploaded).unwrap();
        store.claim_uploading(3, "term", "d3", 300).unwrap();
        store.set_status(3, "term", UploadStatus::Uploaded).unwrap();

        let info = store.get_upload_info(1, "term").unwrap().unwrap();
        assert_eq!(info.bytes_ago, 100 + 200 + 300);
        assert_eq!(info.uploads_ago, 3);
        assert_eq!(info.status, UploadStatus::Uploaded);

        let info = store.get_upload_info(3, "term").unwrap().unwrap();
        assert_eq!(info.bytes_ago, 300);
        assert_eq!(info.uploads_ago, 1);
    }

    #[test]
    fn claim_reports_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        assert!(store.claim_uploading(1, "term", "d", 10).unwrap().is_none());
        let prior = store.claim_uploading(1, "term", "d2", 20).unwrap().unwrap();
        assert_eq!(prior.status, UploadStatus::Uploading);
        assert_eq!(prior.description, "d");
    }

    #[test]
    fn forget_removes_all_terminals() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        store.claim_uploading(1, "term-a", "d", 10).unwrap();
        store.claim_uploading(1, "term-b", "d", 10).unwrap();
        store.forget(1).unwrap();
        assert!(store.get_upload_info(1, "term-a").unwrap().is_none());
        assert!(store.get_upload_info(1, "term-b").unwrap().is_none());
    }
}
