//! deckhand Docker Image Build functionality
//!
//! This crate packages a directory into a build context archive and submits
//! it to a Docker build daemon, streaming the build output back line by line.

pub mod builder;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod log;
pub mod pipeline;
pub mod progress;
pub mod tag;

pub use builder::{BuildLogStream, BuildSignal, ContextBody, ImageBuilder, SubmissionState};
pub use context::{
    ArchiveSummary, ArchiveTask, ContextBuilder, ContextFiles, ContextStream, LocalFiles,
};
pub use endpoint::DaemonEndpoint;
pub use error::{BuildError, BuildResult};
pub use log::{BuildLog, BuildLogLine, LineKind};
pub use pipeline::{BuildOutcome, BuildRequest, build_directory, build_directory_from};
pub use progress::BuildProgress;
pub use tag::ImageTag;
pub use tokio_util::sync::CancellationToken;
