//! Camera producers
//!
//! One tokio task per camera pulls from its [`FrameSource`] and publishes
//! into that camera's [`LatestFrame`]. Read errors back off exponentially
//! (100 ms doubling, capped at 5 s) and are reported once per outage on the
//! status channel.

use crate::frame::{Frame, FrameSource, LatestFrame};
use linegate_core::CameraId;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CameraState {
    Online,
    Offline { reason: String },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub camera: CameraId,
    pub state: CameraState,
}

struct Producer {
    camera: CameraId,
    slot: LatestFrame,
    handle: JoinHandle<()>,
}

/// Owns the per-camera producer tasks
pub struct CameraManager {
    producers: Vec<Producer>,
    shutdown: watch::Sender<bool>,
    status_tx: broadcast::Sender<CameraStatus>,
}

impl CameraManager {
    pub fn new(status_capacity: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (status_tx, _) = broadcast::channel(status_capacity.max(1));
        Self {
            producers: Vec::new(),
            shutdown,
            status_tx,
        }
    }

    /// Camera status updates (online/offline/stopped)
    pub fn subscribe(&self) -> broadcast::Receiver<CameraStatus> {
        self.status_tx.subscribe()
    }

    /// Start a producer for `camera` and return the slot it publishes into
    pub fn spawn(&mut self, camera: CameraId, source: Box<dyn FrameSource>) -> LatestFrame {
        let slot = LatestFrame::new();
        info!("📷 Starting {} from {}", camera, source.describe());

        let handle = tokio::spawn(run_producer(
            camera,
            source,
            slot.clone(),
            self.shutdown.subscribe(),
            self.status_tx.clone(),
        ));

        self.producers.push(Producer {
            camera,
            slot: slot.clone(),
            handle,
        });
        slot
    }

    /// Slots of all running cameras, in spawn order
    pub fn slots(&self) -> Vec<(CameraId, LatestFrame)> {
        self.producers
            .iter()
            .map(|p| (p.camera, p.slot.clone()))
            .collect()
    }

    pub fn camera_count(&self) -> usize {
        self.producers.len()
    }

    /// Stop all producers, waiting at most `timeout` for each; stragglers
    /// are aborted. Returns the number of aborted producers.
    pub async fn stop(&mut self, timeout: Duration) -> usize {
        let _ = self.shutdown.send(true);
        let mut aborted = 0;

        for producer in self.producers.drain(..) {
            let abort = producer.handle.abort_handle();
            match tokio::time::timeout(timeout, producer.handle).await {
                Ok(Ok(())) => debug!("{} producer joined", producer.camera),
                Ok(Err(e)) => error!("{} producer panicked: {}", producer.camera, e),
                Err(_) => {
                    warn!("{} producer did not stop within {:?}; aborting", producer.camera, timeout);
                    abort.abort();
                    aborted += 1;
                }
            }
        }

        info!("Camera producers stopped");
        aborted
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        for producer in &self.producers {
            producer.handle.abort();
        }
    }
}

fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(6);
    Duration::from_millis((100u64 << exp).min(MAX_BACKOFF_MS))
}

async fn run_producer(
    camera: CameraId,
    mut source: Box<dyn FrameSource>,
    slot: LatestFrame,
    mut shutdown: watch::Receiver<bool>,
    status_tx: broadcast::Sender<CameraStatus>,
) {
    let interval = source.frame_interval();
    let mut failures: u32 = 0;
    let mut sequence: u64 = 0;
    let mut announced_online = false;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let started = Instant::now();

        let result = tokio::select! {
            result = source.next_frame() => result,
            _ = shutdown.changed() => break,
        };

        let pause = match result {
            Ok(frame) => {
                if failures > 0 || !announced_online {
                    if failures > 0 {
                        info!("{} recovered after {} failed reads", camera, failures);
                    }
                    let _ = status_tx.send(CameraStatus {
                        camera,
                        state: CameraState::Online,
                    });
                    announced_online = true;
                }
                failures = 0;
                if let Some(raw) = frame {
                    sequence += 1;
                    slot.publish(Frame::from_raw(camera, sequence, raw));
                }
                interval.saturating_sub(started.elapsed())
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures == 1 {
                    warn!("{} read failed: {}", camera, e);
                    let _ = status_tx.send(CameraStatus {
                        camera,
                        state: CameraState::Offline { reason: e.to_string() },
                    });
                } else {
                    debug!("{} read failed ({} in a row): {}", camera, failures, e);
                }
                backoff(failures)
            }
        };

        if !pause.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    let _ = status_tx.send(CameraStatus {
        camera,
        state: CameraState::Stopped,
    });
    debug!("{} producer exiting", camera);
}
