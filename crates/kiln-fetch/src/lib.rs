//! Byte-accurate, resumable file acquisition.
//!
//! [`DownloadService`] fetches the items of a [`DownloadTask`] either
//! synchronously (items completed in order, pre-flight validated as a whole)
//! or detached (one worker per item, aggregate completion reported through a
//! supervisor). Resume behaviour is decided by the caller-supplied
//! [`ResumePolicy`], so daemon paths never prompt a terminal.
//!
//! [`DownloadTask`]: kiln_types::DownloadTask

mod archive;
mod error;
mod service;

pub use archive::{extract_tar_gz_strip_top, extract_zip};
pub use error::FetchError;
pub use service::{
    DetachedCallback, DownloadService, ItemFailure, ResumePolicy, TaskCallback, TaskSummary,
};
