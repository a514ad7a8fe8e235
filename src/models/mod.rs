pub mod mutation;
pub mod photo_upload;
pub mod record;
pub mod stats;

pub use mutation::{MutationQueueItem, MutationStatus, NewMutation, Operation, ResourceType};
pub use photo_upload::{NewPhotoUpload, PhotoUploadItem, UploadStatus};
pub use record::{Batch, PhotoRecord, UploadTarget};
pub use stats::{CycleReport, PhotoUploadStats, QueueStats, SkipReason, SyncStats};
