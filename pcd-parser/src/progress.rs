use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use pcd_core::pointcloud::progress::{LoadingProgress, LoadingStage};

use crate::error::ParseError;

/// Parsers report progress and poll for cancellation once per this many records.
pub const PROGRESS_INTERVAL: usize = 10_000;

/// Shared flag checked by parsers between record batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct ProgressReporter<'a> {
    callback: Box<dyn FnMut(LoadingProgress) + 'a>,
    cancel: CancellationToken,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: impl FnMut(LoadingProgress) + 'a) -> Self {
        Self {
            callback: Box::new(callback),
            cancel: CancellationToken::new(),
        }
    }

    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn report(&mut self, stage: LoadingStage, loaded: u64, total: u64) {
        (self.callback)(LoadingProgress::new(stage, loaded, total));
    }

    pub fn ensure_not_cancelled(&self) -> Result<(), ParseError> {
        if self.cancel.is_cancelled() {
            Err(ParseError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Batch boundary inside the parse loop.
    pub fn checkpoint(&mut self, loaded: u64, total: u64) -> Result<(), ParseError> {
        self.ensure_not_cancelled()?;
        self.report(LoadingStage::Parsing, loaded, total);
        Ok(())
    }
}
