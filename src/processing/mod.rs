use std::path::Path;
use crate::api::Track;
use crate::errors::Result;

/// Runs after a successful fetch (tagging, conversion, moving into place).
///
/// An `Err` counts as a retryable failure of the whole attempt.
#[async_trait::async_trait]
pub trait PostProcessor {
    async fn process(&self, file_path: &Path, track: &Track) -> Result<()>;
    fn get_name(&self) -> &str;
}

/// Leaves the fetched file untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPostProcessing;

#[async_trait::async_trait]
impl PostProcessor for NoPostProcessing {
    async fn process(&self, file_path: &Path, track: &Track) -> Result<()> {
        log::debug!(
            "[PROCESS] nothing to do for {} at {}",
            track.display_name(),
            file_path.display()
        );
        Ok(())
    }

    fn get_name(&self) -> &str {
        "none"
    }
}
