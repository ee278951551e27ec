//! Observable progress of one upload run.

use serde::Serialize;
use std::fmt;

/// Step the orchestrator is in. Steps only move forward; `Error` returns to `Form` through
/// [`crate::orchestrator::IngestionOrchestrator::reset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "camelCase")]
pub enum UploadState {
    /// Collecting and validating input.
    Form,
    /// Allocating the upload slot or transferring the raw document.
    Uploading {
        /// Human-readable sub-step.
        message: String,
    },
    /// Splitting the document into single pages.
    Parsing {
        /// Human-readable sub-step.
        message: String,
    },
    /// Extracting pages; `current` advances in whole windows.
    Processing {
        /// Pages settled so far.
        current: usize,
        /// Pages in the document.
        total: usize,
    },
    /// Sending batches; `current` is the number of pages before the batch in flight.
    Ingesting {
        /// Pages already submitted.
        current: usize,
        /// Pages in the document.
        total: usize,
    },
    /// Uploading the thumbnail.
    Finalizing {
        /// Human-readable sub-step.
        message: String,
    },
    /// Rulebook is ready at its slug.
    Done {
        /// Slug of the rulebook page.
        slug: String,
    },
    /// The run stopped; a new run must start from the form.
    Error {
        /// Failure surfaced to the user.
        message: String,
    },
}

impl UploadState {
    /// Whether a run is currently driving the state.
    pub fn is_busy(&self) -> bool {
        !matches!(
            self,
            UploadState::Form | UploadState::Done { .. } | UploadState::Error { .. }
        )
    }

    /// Completion percentage for the counted steps.
    pub fn percent(&self) -> Option<u8> {
        match self {
            UploadState::Processing { current, total } | UploadState::Ingesting { current, total }
                if *total > 0 =>
            {
                Some(((*current * 100) / *total).min(100) as u8)
            }
            _ => None,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Form => f.write_str("Waiting for input"),
            UploadState::Uploading { message }
            | UploadState::Parsing { message }
            | UploadState::Finalizing { message } => f.write_str(message),
            UploadState::Processing { current, total } => {
                write!(f, "Processing pages with AI... {current} / {total}")
            }
            UploadState::Ingesting { current, total } => {
                write!(f, "Indexing pages... {current} / {total}")
            }
            UploadState::Done { slug } => write!(f, "Rulebook ready at /games/{slug}"),
            UploadState::Error { message } => write!(f, "Upload failed: {message}"),
        }
    }
}
