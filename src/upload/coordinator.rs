//! §4.D upload coordinator: freshness predicate, transport selection, and
//! the `retry_uploading_until_success` protocol.
//!
//! Grounded on `examples/original_source/ikup/ikup_terminal.py`
//! (`needs_uploading`, `upload`, `_upload`, `get_upload_method`,
//! `get_max_upload_size`, `_transmit_file_or_bytes`) and
//! `examples/original_source/tupimage/id_manager.py`'s `needs_uploading`;
//! the richer `UPLOADING`/`UPLOADED`/`DIRTY` claim protocol and the
//! `RetryAssignId` signal follow the prose directly (no single Python
//! function implements the full state machine in one place).

use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::upload::store::{UploadInfo, UploadStatus, UploadStore, now_epoch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionMedium {
    #[default]
    Auto,
    Direct,
    File,
    TempFile,
}

impl TransmissionMedium {
    pub fn from_str_opt(s: &str) -> Option<TransmissionMedium> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(TransmissionMedium::Auto),
            "direct" => Some(TransmissionMedium::Direct),
            "file" => Some(TransmissionMedium::File),
            "temp_file" | "tempfile" => Some(TransmissionMedium::TempFile),
            _ => None,
        }
    }

    /// Resolve `auto` given whether the session is detected to be inside
    /// SSH (spec §4.D "Transport selection").
    pub fn resolve(self, inside_ssh: bool) -> TransmissionMedium {
        match self {
            TransmissionMedium::Auto => {
                if inside_ssh {
                    TransmissionMedium::Direct
                } else {
                    TransmissionMedium::File
                }
            }
            other => other,
        }
    }
}

pub struct ReuploadThresholds {
    pub max_bytes_ago: u64,
    pub max_uploads_ago: u64,
    pub max_seconds_ago: i64,
}

impl Default for ReuploadThresholds {
    fn default() -> Self {
        Self {
            max_bytes_ago: 20 * 1024 * 1024,
            max_uploads_ago: 1024,
            max_seconds_ago: 3600,
        }
    }
}

/// `needs_uploading(id, terminal_id)` (spec §4.D "Freshness predicate").
pub fn needs_uploading(
    store: &UploadStore,
    image_id: u32,
    terminal_id: &str,
    description: &str,
    thresholds: &ReuploadThresholds,
) -> Result<bool> {
    let Some(info) = store.get_upload_info(image_id, terminal_id)? else {
        return Ok(true);
    };
    if info.status != UploadStatus::Uploaded || info.description != description {
        return Ok(true);
    }
    if info.bytes_ago > thresholds.max_bytes_ago || info.uploads_ago > thresholds.max_uploads_ago {
        return Ok(true);
    }
    if now_epoch() - info.upload_time > thresholds.max_seconds_ago {
        return Ok(true);
    }
    Ok(false)
}

/// Per-transport byte budget (spec §4.D "Byte budget").
pub fn max_upload_size(medium: TransmissionMedium, stream_max_size: u64, file_max_size: u64) -> u64 {
    match medium {
        TransmissionMedium::Direct => stream_max_size,
        TransmissionMedium::File | TransmissionMedium::TempFile => file_max_size,
        TransmissionMedium::Auto => file_max_size,
    }
}

/// Outcome of one `retry_uploading_until_success` attempt.
pub enum UploadOutcome {
    /// The upload committed (or was already fresh and skipped).
    Done,
    /// The ID's description changed mid-upload (reassigned elsewhere); the
    /// caller must restart from ID assignment. This is the Rust expression
    /// of the internal `RetryAssignId` control-flow signal — it never
    /// reaches the public API as an [`crate::error::Error`] variant.
    RetryAssignId,
}

/// `retry_uploading_until_success(id, terminal, fn, size, description,
/// stall_timeout, force, allow_concurrent, mark_uploaded)`.
///
/// `transmit` performs the actual KGP command(s) (§4.E) given the claimed
/// [`UploadInfo`]; on success the coordinator finalizes the record, on
/// error it releases the `UPLOADING` claim and propagates.
pub fn retry_uploading_until_success(
    store: &mut UploadStore,
    image_id: u32,
    terminal_id: &str,
    mut transmit: impl FnMut(&UploadInfo) -> Result<()>,
    size_bytes: u64,
    description: &str,
    stall_timeout_secs: i64,
    force: bool,
    allow_concurrent: bool,
    mark_uploaded: bool,
) -> Result<UploadOutcome> {
    const BACKOFF: Duration = Duration::from_millis(50);
    const MAX_WAIT_ROUNDS: u32 = 200; // ~10s of backoff before giving up on a stuck peer

    let mut waited = 0;
    loop {
        let existing = store.get_upload_info(image_id, terminal_id)?;
        if let Some(info) = &existing {
            if !force && info.status == UploadStatus::Uploaded && info.description == description {
                return Ok(UploadOutcome::Done);
            }
            if info.status == UploadStatus::Uploading
                && now_epoch() - info.upload_time < stall_timeout_secs
                && !allow_concurrent
            {
                if waited >= MAX_WAIT_ROUNDS {
                    return Err(crate::error::Error::Internal(format!(
                        "upload of id {image_id} to terminal {terminal_id} stalled"
                    )));
                }
                waited += 1;
                thread::sleep(BACKOFF);
                continue;
            }
        }

        store.claim_uploading(image_id, terminal_id, description, size_bytes)?;
        let claimed = store
            .get_upload_info(image_id, terminal_id)?
            .expect("just claimed");

        match transmit(&claimed) {
            Ok(()) => {
                let after = store.get_upload_info(image_id, terminal_id)?;
                let reassigned = after.as_ref().is_none_or(|a| a.description != description);
                if reassigned {
                    return Ok(UploadOutcome::RetryAssignId);
                }
                let status = if mark_uploaded {
                    UploadStatus::Uploaded
                } else {
                    UploadStatus::Dirty
                };
                store.set_status(image_id, terminal_id, status)?;
                return Ok(UploadOutcome::Done);
            }
            Err(e) => {
                store.forget_for_terminal(image_id, terminal_id)?;
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_resolves_from_ssh_detection() {
        assert_eq!(
            TransmissionMedium::Auto.resolve(true),
            TransmissionMedium::Direct
        );
        assert_eq!(
            TransmissionMedium::Auto.resolve(false),
            TransmissionMedium::File
        );
        assert_eq!(
            TransmissionMedium::File.resolve(true),
            TransmissionMedium::File
        );
    }

    #[test]
    fn needs_uploading_is_true_with_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        assert!(
            needs_uploading(&store, 1, "term", "desc", &ReuploadThresholds::default()).unwrap()
        );
    }

    #[test]
    fn retry_uploading_marks_uploaded_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        let outcome = retry_uploading_until_success(
            &mut store,
            1,
            "term",
            |_info| Ok(()),
            100,
            "desc",
            2,
            false,
            false,
            true,
        )
        .unwrap();
        assert!(matches!(outcome, UploadOutcome::Done));

        let info = store.get_upload_info(1, "term").unwrap().unwrap();
        assert_eq!(info.status, UploadStatus::Uploaded);

        assert!(
            !needs_uploading(&store, 1, "term", "desc", &ReuploadThresholds::default()).unwrap()
        );
    }

    #[test]
    fn retry_uploading_releases_claim_on_transmit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        let result = retry_uploading_until_success(
            &mut store,
            1,
            "term",
            |_info| Err(crate::error::Error::FileMissing(std::path::PathBuf::from("/tmp/gone.png"))),
            100,
            "desc",
            2,
            false,
            false,
            true,
        );
        assert!(result.is_err());
        assert!(store.get_upload_info(1, "term").unwrap().is_none());
    }

    #[test]
    fn transmit_failure_does_not_disturb_other_terminals() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        retry_uploading_until_success(
            &mut store, 1, "term-a", |_| Ok(()), 100, "desc", 2, false, false, true,
        )
        .unwrap();

        let result = retry_uploading_until_success(
            &mut store,
            1,
            "term-b",
            |_info| Err(crate::error::Error::FileMissing(std::path::PathBuf::from("/tmp/gone.png"))),
            100,
            "desc",
            2,
            false,
            false,
            true,
        );
        assert!(result.is_err());
        assert!(store.get_upload_info(1, "term-b").unwrap().is_none());
        let still_there = store.get_upload_info(1, "term-a").unwrap().unwrap();
        assert_eq!(still_there.status, UploadStatus::Uploaded);
    }

    #[test]
    fn mark_uploaded_false_leaves_status_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = UploadStore::open(&dir.path().join("ids.db")).unwrap();
        retry_uploading_until_success(
            &mut store, 1, "term", |_| Ok(()), 100, "desc", 2, false, false, false,
        )
        .unwrap();
        let info = store.get_upload_info(1, "term").unwrap().unwrap();
        assert_eq!(info.status, UploadStatus::Dirty);
    }
}
