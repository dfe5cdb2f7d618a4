//! Background parse worker.
//!
//! Parsing runs on a single dedicated thread so the caller stays responsive.
//! Every request carries its own reply channel and cancellation token. A new
//! submission cancels whatever request is still in flight, so at most one
//! parse is doing useful work at any time.

use std::{
    panic::{self, AssertUnwindSafe},
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, SendError, Sender, TryRecvError};

use pcd_core::pointcloud::{point::PointCloudData, progress::LoadingProgress};
use pcd_parser::{dispatch, CancellationToken, ParseError, ParseOptions, ProgressReporter};

use crate::error::LoadError;

pub const WORKER_THREAD_NAME: &str = "pcd-parse-worker";

pub type RequestId = u64;

/// Messages sent from the worker back to the requester.
///
/// Each request receives any number of `Progress` messages followed by
/// exactly one `Success` or `Error`.
#[derive(Debug)]
pub enum WorkerMessage {
    Progress {
        id: RequestId,
        progress: LoadingProgress,
    },
    Success {
        id: RequestId,
        data: Box<PointCloudData>,
    },
    Error {
        id: RequestId,
        error: ParseError,
    },
}

impl WorkerMessage {
    pub fn id(&self) -> RequestId {
        match self {
            WorkerMessage::Progress { id, .. }
            | WorkerMessage::Success { id, .. }
            | WorkerMessage::Error { id, .. } => *id,
        }
    }
}

struct ParseRequest {
    id: RequestId,
    filename: String,
    bytes: Bytes,
    options: ParseOptions,
    cancel: CancellationToken,
    reply: Sender<WorkerMessage>,
}

struct WorkerThread {
    requests: Sender<ParseRequest>,
    join_handle: JoinHandle<()>,
}

/// Owner of the parse thread. The thread is spawned on first use.
#[derive(Default)]
pub struct ParseWorker {
    thread: Option<WorkerThread>,
    last_id: RequestId,
    in_flight: Option<CancellationToken>,
}

impl ParseWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Queues a parse request, cancelling the previous one if it is still running.
    pub fn submit(
        &mut self,
        filename: impl Into<String>,
        bytes: Bytes,
        options: ParseOptions,
    ) -> Result<ParseTask, LoadError> {
        if let Some(previous) = self.in_flight.take() {
            previous.cancel();
        }

        self.last_id += 1;
        let id = self.last_id;
        let filename = filename.into();
        let (reply, messages) = channel::unbounded();
        let cancel = CancellationToken::new();

        log::debug!("submitting parse request {} for {}", id, filename);
        let request = ParseRequest {
            id,
            filename,
            bytes,
            options,
            cancel: cancel.clone(),
            reply,
        };
        let sent = self.spawned()?.requests.send(request);
        if let Err(SendError(request)) = sent {
            log::warn!("parse worker thread is gone, restarting it");
            self.discard_thread();
            self.spawned()?
                .requests
                .send(request)
                .map_err(|_| LoadError::WorkerUnavailable)?;
        }

        self.in_flight = Some(cancel.clone());
        Ok(ParseTask {
            id,
            messages,
            cancel,
            finished: false,
        })
    }

    /// Cancels the in-flight request and stops the thread. A later
    /// `submit` starts a fresh one.
    pub fn dispose(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        self.discard_thread();
    }

    fn discard_thread(&mut self) {
        if let Some(WorkerThread {
            requests,
            join_handle,
        }) = self.thread.take()
        {
            drop(requests);
            if join_handle.join().is_err() {
                log::error!("parse worker thread panicked");
            }
            log::debug!("parse worker stopped");
        }
    }

    fn spawned(&mut self) -> Result<&WorkerThread, LoadError> {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => {
                let (requests, incoming) = channel::unbounded::<ParseRequest>();
                let join_handle = thread::Builder::new()
                    .name(WORKER_THREAD_NAME.to_string())
                    .spawn(move || run(incoming))?;
                log::debug!("parse worker started");
                WorkerThread {
                    requests,
                    join_handle,
                }
            }
        };
        let thread: &WorkerThread = self.thread.insert(thread);
        Ok(thread)
    }
}

impl Drop for ParseWorker {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run(incoming: Receiver<ParseRequest>) {
    for request in incoming.iter() {
        handle(request);
    }
}

fn handle(request: ParseRequest) {
    let ParseRequest {
        id,
        filename,
        bytes,
        options,
        cancel,
        reply,
    } = request;

    let outcome = if cancel.is_cancelled() {
        Err(ParseError::Cancelled)
    } else {
        let progress_reply = reply.clone();
        let mut reporter = ProgressReporter::new(move |progress| {
            let _ = progress_reply.send(WorkerMessage::Progress { id, progress });
        })
        .with_cancellation(cancel);

        guarded(&filename, || {
            dispatch(&filename, bytes, &options, &mut reporter)
        })
    };

    let message = match outcome {
        Ok(data) => {
            log::debug!("request {}: parsed {} points", id, data.count());
            WorkerMessage::Success {
                id,
                data: Box::new(data),
            }
        }
        Err(error) => {
            log::debug!("request {}: {}", id, error);
            WorkerMessage::Error { id, error }
        }
    };

    if reply.send(message).is_err() {
        log::debug!("request {}: requester is gone, result dropped", id);
    }
}

/// Runs a parse, turning a panic into `MalformedFile` so the thread survives.
fn guarded(
    filename: &str,
    parse: impl FnOnce() -> Result<PointCloudData, ParseError>,
) -> Result<PointCloudData, ParseError> {
    panic::catch_unwind(AssertUnwindSafe(parse)).unwrap_or_else(|_| {
        log::error!("parser panicked on {}", filename);
        Err(ParseError::malformed(format!(
            "parser crashed while reading {}",
            filename
        )))
    })
}

/// Handle to one submitted request.
pub struct ParseTask {
    id: RequestId,
    messages: Receiver<WorkerMessage>,
    cancel: CancellationToken,
    finished: bool,
}

impl ParseTask {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the request finishes, forwarding progress as it arrives.
    pub fn wait(
        mut self,
        mut on_progress: impl FnMut(LoadingProgress),
    ) -> Result<PointCloudData, LoadError> {
        loop {
            let message = self
                .messages
                .recv()
                .map_err(|_| LoadError::WorkerUnavailable)?;
            if let Some(result) = self.accept(message, &mut on_progress) {
                return result;
            }
        }
    }

    /// Drains whatever the worker has sent so far without blocking.
    ///
    /// Returns the terminal result exactly once; `None` while the request
    /// is still running and after the result has been taken.
    pub fn poll(
        &mut self,
        mut on_progress: impl FnMut(LoadingProgress),
    ) -> Option<Result<PointCloudData, LoadError>> {
        while !self.finished {
            match self.messages.try_recv() {
                Ok(message) => {
                    if let Some(result) = self.accept(message, &mut on_progress) {
                        return Some(result);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    return Some(Err(LoadError::WorkerUnavailable));
                }
            }
        }
        None
    }

    fn accept(
        &mut self,
        message: WorkerMessage,
        on_progress: &mut impl FnMut(LoadingProgress),
    ) -> Option<Result<PointCloudData, LoadError>> {
        if message.id() != self.id {
            log::warn!(
                "request {}: ignoring message for request {}",
                self.id,
                message.id()
            );
            return None;
        }
        match message {
            WorkerMessage::Progress { progress, .. } => {
                on_progress(progress);
                None
            }
            WorkerMessage::Success { data, .. } => {
                self.finished = true;
                Some(Ok(*data))
            }
            WorkerMessage::Error { error, .. } => {
                self.finished = true;
                Some(Err(error.into()))
            }
        }
    }
}
