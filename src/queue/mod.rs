//! Queue Store: durable CRUD over the two queue tables. No network calls.

pub mod mutation_queue;
pub mod photo_queue;

pub use mutation_queue::{insert_mutation, MutationQueue};
pub use photo_queue::{insert_photo_upload, PhotoUploadQueue};
