//! Background dissection thread fed by a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::Session;
use crate::error::{Error, Result};
use crate::frame::RawFrame;

/// How long the thread waits for input before rechecking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pulls [`RawFrame`]s from a channel, dissects them in batches of up to
/// `batch_size` and publishes each batch to the session's store.
///
/// The session is closed when the channel disconnects, on cancellation, or
/// on error, so cursor readers always observe the end of input.
pub struct Pipeline {
    session: Arc<Session>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl Pipeline {
    pub fn spawn(session: Arc<Session>, receiver: Receiver<RawFrame>) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("layerscope-dissect".into())
            .spawn({
                let session = Arc::clone(&session);
                let cancel = Arc::clone(&cancel);
                move || {
                    let result = run(&session, &receiver, &cancel);
                    session.close();
                    result
                }
            })?;

        Ok(Self {
            session,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Ask the thread to stop after the batch in progress.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread and return the number of frames it published.
    pub fn join(mut self) -> Result<u64> {
        self.wait()
    }

    fn wait(&mut self) -> Result<u64> {
        let Some(handle) = self.handle.take() else {
            return Ok(0);
        };
        handle
            .join()
            .map_err(|_| Error::Pipeline("dissection thread panicked".into()))?
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel();
        if let Err(e) = self.wait() {
            warn!(error = %e, "pipeline stopped with error");
        }
    }
}

fn run(session: &Session, receiver: &Receiver<RawFrame>, cancel: &AtomicBool) -> Result<u64> {
    let batch_size = session.config().batch_size.max(1);
    let mut processed = 0u64;
    let mut batches = 0u64;

    loop {
        if cancel.load(Ordering::Acquire) {
            debug!(frames = processed, "pipeline cancelled");
            break;
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(first) => {
                let mut batch = Vec::with_capacity(batch_size);
                batch.push(first);
                batch.extend(receiver.try_iter().take(batch_size - 1));

                processed += session.ingest_batch(batch)? as u64;
                batches += 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(frames = processed, batches, "pipeline finished");
    Ok(processed)
}
