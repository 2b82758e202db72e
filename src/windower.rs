use crate::synchronizer::{CompoundSample, SampleSynchronizer};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

/// A fixed-size batch of consecutive complete samples, scored as one unit.
#[derive(Clone, Debug)]
pub struct Window {
    samples: Vec<CompoundSample>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Flatten to ax,ay,az,gx,gy,gz per sample. Every member is complete by
    /// construction, so the result has exactly `6 * len()` values.
    pub fn flatten(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.samples.len() * 6);
        for sample in &self.samples {
            if let Some(axes) = sample.flat() {
                flat.extend_from_slice(&axes);
            }
        }
        flat
    }
}

/// Groups complete samples into non-overlapping fixed-size windows.
///
/// Incomplete samples are skipped without counting toward the window, so a
/// window is not guaranteed to be time-contiguous.
pub struct Windower {
    size: usize,
    buf: Vec<CompoundSample>,
}

impl Windower {
    pub fn new(size: usize) -> Self {
        Windower {
            size,
            buf: Vec::with_capacity(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Feed one snapshot. Returns a full window once `size` complete samples
    /// have accumulated, clearing the accumulator.
    pub fn push(&mut self, sample: CompoundSample) -> Option<Window> {
        if !sample.is_complete() {
            return None;
        }

        self.buf.push(sample);
        if self.buf.len() >= self.size {
            let samples = std::mem::replace(&mut self.buf, Vec::with_capacity(self.size));
            Some(Window { samples })
        } else {
            None
        }
    }
}

/// Sampling ticker task. Snapshots the synchronizer on a fixed cadence,
/// forwards every snapshot to the upload path, and feeds complete ones into
/// the window accumulator. Emitted windows go to the scoring task over a
/// bounded channel; a full channel drops the window rather than stalling the
/// ticker. Stopping the task discards any partial accumulator.
pub async fn ticker_loop(
    sync: Arc<SampleSynchronizer>,
    tick_interval: Duration,
    window_size: usize,
    window_tx: Sender<Window>,
    record_tx: Sender<CompoundSample>,
) {
    let mut interval = interval(tick_interval);
    let mut windower = Windower::new(window_size);
    let mut emitted = 0u64;

    loop {
        interval.tick().await;

        let sample = sync.snapshot();

        match record_tx.try_send(sample.clone()) {
            Ok(_) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                eprintln!("[ticker] Record channel closed, stopping");
                break;
            }
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                // Upload batcher behind, drop this record
            }
        }

        if let Some(window) = windower.push(sample) {
            match window_tx.try_send(window) {
                Ok(_) => {
                    emitted += 1;
                    if emitted % 100 == 0 {
                        eprintln!("[ticker] {} windows emitted", emitted);
                    }
                }
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                    eprintln!("[ticker] Window channel closed after {} windows", emitted);
                    break;
                }
                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("Scoring backlog full, dropping window");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(ts: i64, v: f32) -> CompoundSample {
        CompoundSample {
            timestamp_ms: ts,
            accel: Some([v, v, v]),
            gyro: Some([v, v, v]),
        }
    }

    fn incomplete(ts: i64) -> CompoundSample {
        CompoundSample {
            timestamp_ms: ts,
            accel: Some([1.0, 1.0, 1.0]),
            gyro: None,
        }
    }

    #[test]
    fn test_emits_exactly_at_window_size() {
        let mut windower = Windower::new(3);
        assert!(windower.push(complete(0, 1.0)).is_none());
        assert!(windower.push(complete(1, 2.0)).is_none());

        let window = windower.push(complete(2, 3.0)).expect("third sample fills");
        assert_eq!(window.len(), 3);
        assert_eq!(window.flatten().len(), 18);
    }

    #[test]
    fn test_windows_are_non_overlapping_and_ordered() {
        let mut windower = Windower::new(2);
        assert!(windower.push(complete(0, 1.0)).is_none());
        let first = windower.push(complete(1, 2.0)).unwrap();
        assert!(windower.push(complete(2, 3.0)).is_none());
        let second = windower.push(complete(3, 4.0)).unwrap();

        assert_eq!(first.flatten()[0], 1.0);
        assert_eq!(first.flatten()[6], 2.0);
        assert_eq!(second.flatten()[0], 3.0);
        assert_eq!(second.flatten()[6], 4.0);
    }

    #[test]
    fn test_incomplete_samples_are_skipped_not_counted() {
        let mut windower = Windower::new(2);
        assert!(windower.push(complete(0, 1.0)).is_none());
        assert!(windower.push(incomplete(1)).is_none());
        assert!(windower.push(incomplete(2)).is_none());

        let window = windower.push(complete(3, 2.0)).expect("second complete fills");
        assert_eq!(window.len(), 2);
        // The gap does not appear in the window
        assert_eq!(window.flatten(), vec![1.0; 6].iter().chain(&[2.0; 6]).copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_flatten_axis_order() {
        let mut windower = Windower::new(1);
        let sample = CompoundSample {
            timestamp_ms: 0,
            accel: Some([1.0, 2.0, 3.0]),
            gyro: Some([4.0, 5.0, 6.0]),
        };
        let window = windower.push(sample).unwrap();
        assert_eq!(window.flatten(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[tokio::test]
    async fn test_ticker_loop_emits_windows_and_records() {
        let sync = Arc::new(SampleSynchronizer::new());
        sync.on_accel(crate::sensors::AccelData {
            timestamp_ms: 0,
            x: 1.0,
            y: 2.0,
            z: 3.0,
        });
        sync.on_gyro(crate::sensors::GyroData {
            timestamp_ms: 0,
            x: 0.1,
            y: 0.2,
            z: 0.3,
        });

        let (window_tx, mut window_rx) = tokio::sync::mpsc::channel(8);
        let (record_tx, mut record_rx) = tokio::sync::mpsc::channel(64);

        let handle = tokio::spawn(ticker_loop(
            sync,
            Duration::from_millis(1),
            4,
            window_tx,
            record_tx,
        ));

        let window = tokio::time::timeout(Duration::from_secs(2), window_rx.recv())
            .await
            .expect("window within deadline")
            .expect("channel open");
        assert_eq!(window.len(), 4);
        assert_eq!(window.flatten().len(), 24);

        let record = record_rx.recv().await.expect("record forwarded");
        assert!(record.is_complete());

        handle.abort();
    }
}
