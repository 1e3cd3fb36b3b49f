//! Per-tick pose transmission with a bounded attempt time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use caramel_core::protocol::JointPose;
use caramel_core::{CaramelError, JointFrame, Result};
use caramel_telemetry::{names, MetricsRecorder};

use crate::channel::{PoseBatchChannel, PoseStream};
use crate::requested::RequestedSet;

pub const DEFAULT_TRANSMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Filters frames down to the requested set and sends them, giving up after
/// `timeout`.
#[derive(Clone)]
pub struct PoseTransmitter {
    requested: RequestedSet,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl PoseTransmitter {
    pub fn new(requested: RequestedSet, timeout: Duration, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            requested,
            timeout,
            metrics,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn requested(&self) -> &RequestedSet {
        &self.requested
    }

    /// Frames whose name the host asked for, in input order.
    pub fn filter<'a>(&self, frames: &'a [JointFrame]) -> Vec<&'a JointFrame> {
        let wanted = self.requested.names();
        frames
            .iter()
            .filter(|f| wanted.iter().any(|n| *n == f.name))
            .collect()
    }

    /// Send one tick of frames. Returns how many were sent.
    pub async fn transmit_frames(&self, stream: &PoseStream, frames: &[JointFrame]) -> Result<usize> {
        let selected = self.filter(frames);
        if selected.is_empty() {
            return Ok(0);
        }
        let count = selected.len();
        self.bounded(stream.send_frames(&selected)).await?;
        debug!(count, "frames transmitted");
        Ok(count)
    }

    /// Send one pose batch and wait for its acknowledgement.
    pub async fn transmit_poses(
        &self,
        channel: &mut PoseBatchChannel,
        poses: &[JointPose],
    ) -> Result<usize> {
        self.bounded(channel.send_batch(poses)).await?;
        Ok(poses.len())
    }

    async fn bounded<F>(&self, attempt: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => {
                self.metrics.histogram_observe(
                    names::TRANSMIT_LATENCY_MS,
                    &[],
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                result
            }
            Err(_) => {
                self.metrics.counter_inc(names::TRANSMIT_TIMEOUTS, &[], 1);
                warn!(timeout_ms = self.timeout.as_millis() as u64, "pose transmission timed out");
                Err(CaramelError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caramel_core::{Quaternion, Vector3};

    fn frame(name: &str) -> JointFrame {
        JointFrame::new(name, Vector3::ZERO, Quaternion::IDENTITY)
    }

    fn transmitter(timeout: Duration) -> PoseTransmitter {
        PoseTransmitter::new(RequestedSet::new(), timeout, Arc::new(MetricsRecorder::new()))
    }

    #[test]
    fn default_set_passes_only_head() {
        let t = transmitter(DEFAULT_TRANSMIT_TIMEOUT);
        let frames = vec![frame("hips_joint"), frame("head_joint"), frame("left_hand_joint")];
        let selected = t.filter(&frames);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "head_joint");
    }

    #[test]
    fn filter_follows_updates_and_keeps_order() {
        let t = transmitter(DEFAULT_TRANSMIT_TIMEOUT);
        t.requested()
            .replace(vec!["left_hand_joint".into(), "head_joint".into()]);
        let frames = vec![frame("left_hand_joint"), frame("hips_joint"), frame("head_joint")];
        let names: Vec<&str> = t.filter(&frames).iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["left_hand_joint", "head_joint"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_attempt_times_out() {
        let t = transmitter(Duration::from_secs(10));
        let err = t
            .bounded(futures::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, CaramelError::Timeout(d) if d == Duration::from_secs(10)));
        assert_eq!(t.metrics.counter_get(names::TRANSMIT_TIMEOUTS, &[]), 1);
    }

    #[tokio::test]
    async fn completed_attempt_records_latency() {
        let t = transmitter(Duration::from_secs(1));
        t.bounded(async { Ok(()) }).await.unwrap();
        assert_eq!(t.metrics.histogram_summary(names::TRANSMIT_LATENCY_MS, &[]).count, 1);
    }
}
