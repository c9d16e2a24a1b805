pub mod client;
pub mod models;

pub use client::{CoordinatorClient, SignedUrlSource};
pub use models::{
    read_blob_paths, read_signed_url_mapping, write_blob_paths, write_signed_url_mapping,
};
