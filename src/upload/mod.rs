//! §4.D upload coordinator and its persistence.

pub mod coordinator;
pub mod store;

pub use coordinator::{
    ReuploadThresholds, TransmissionMedium, UploadOutcome, max_upload_size, needs_uploading,
    retry_uploading_until_success,
};
pub use store::{UploadInfo, UploadStatus, UploadStore};
