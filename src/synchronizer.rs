use crate::sensors::{current_millis, AccelData, GyroData};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

/// One fused reading: the latest value from each sensor channel as of a tick.
///
/// Either channel may not have reported yet, in which case its triple is
/// absent. Only complete samples (both triples present) are eligible for
/// windowing; incomplete ones still travel to the upload path so the raw
/// record stream has no holes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompoundSample {
    /// Tick time in wall-clock millis, not sensor event time.
    pub timestamp_ms: i64,
    pub accel: Option<[f32; 3]>,
    pub gyro: Option<[f32; 3]>,
}

impl CompoundSample {
    pub fn is_complete(&self) -> bool {
        self.accel.is_some() && self.gyro.is_some()
    }

    /// Flat axis values in fixed order (ax, ay, az, gx, gy, gz).
    /// None if either channel is absent.
    pub fn flat(&self) -> Option<[f32; 6]> {
        let [ax, ay, az] = self.accel?;
        let [gx, gy, gz] = self.gyro?;
        Some([ax, ay, az, gx, gy, gz])
    }
}

impl Display for CompoundSample {
    /// Fixed-column record line; absent axis values render as `null` so the
    /// column count never varies.
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.timestamp_ms)?;
        match self.accel {
            Some([x, y, z]) => write!(f, ", {}, {}, {}", x, y, z)?,
            None => write!(f, ", null, null, null")?,
        }
        match self.gyro {
            Some([x, y, z]) => write!(f, ", {}, {}, {}", x, y, z),
            None => write!(f, ", null, null, null"),
        }
    }
}

/// Holds the most recent reading from each channel and pairs them on demand.
///
/// Each slot is replaced as a unit behind its own lock; staleness across the
/// two channels is expected (the snapshot pairs whatever was last seen, the
/// two readings are not required to share an event time).
pub struct SampleSynchronizer {
    accel: Mutex<Option<AccelData>>,
    gyro: Mutex<Option<GyroData>>,
}

impl SampleSynchronizer {
    pub fn new() -> Self {
        SampleSynchronizer {
            accel: Mutex::new(None),
            gyro: Mutex::new(None),
        }
    }

    pub fn on_accel(&self, reading: AccelData) {
        if let Ok(mut slot) = self.accel.lock() {
            *slot = Some(reading);
        }
    }

    pub fn on_gyro(&self, reading: GyroData) {
        if let Ok(mut slot) = self.gyro.lock() {
            *slot = Some(reading);
        }
    }

    /// Pair the last-known values and stamp with the current time.
    pub fn snapshot(&self) -> CompoundSample {
        let accel = self
            .accel
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|r| r.axes()));
        let gyro = self
            .gyro
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|r| r.axes()));

        CompoundSample {
            timestamp_ms: current_millis(),
            accel,
            gyro,
        }
    }
}

impl Default for SampleSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accel(x: f32, y: f32, z: f32) -> AccelData {
        AccelData {
            timestamp_ms: 0,
            x,
            y,
            z,
        }
    }

    fn gyro(x: f32, y: f32, z: f32) -> GyroData {
        GyroData {
            timestamp_ms: 0,
            x,
            y,
            z,
        }
    }

    #[test]
    fn test_snapshot_before_any_reading_is_incomplete() {
        let sync = SampleSynchronizer::new();
        let sample = sync.snapshot();
        assert!(sample.accel.is_none());
        assert!(sample.gyro.is_none());
        assert!(!sample.is_complete());
        assert!(sample.flat().is_none());
    }

    #[test]
    fn test_snapshot_with_one_channel_is_incomplete() {
        let sync = SampleSynchronizer::new();
        sync.on_accel(accel(1.0, 2.0, 3.0));

        let sample = sync.snapshot();
        assert_eq!(sample.accel, Some([1.0, 2.0, 3.0]));
        assert!(sample.gyro.is_none());
        assert!(!sample.is_complete());
    }

    #[test]
    fn test_snapshot_after_both_channels_is_complete() {
        let sync = SampleSynchronizer::new();
        sync.on_accel(accel(1.0, 2.0, 3.0));
        sync.on_gyro(gyro(0.1, 0.2, 0.3));

        let sample = sync.snapshot();
        assert!(sample.is_complete());
        assert_eq!(sample.flat(), Some([1.0, 2.0, 3.0, 0.1, 0.2, 0.3]));
    }

    #[test]
    fn test_readings_replace_previous_value() {
        let sync = SampleSynchronizer::new();
        sync.on_accel(accel(1.0, 1.0, 1.0));
        sync.on_accel(accel(2.0, 2.0, 2.0));
        sync.on_gyro(gyro(0.0, 0.0, 0.0));

        let sample = sync.snapshot();
        assert_eq!(sample.accel, Some([2.0, 2.0, 2.0]));
    }

    #[test]
    fn test_record_line_keeps_column_count_with_absent_axes() {
        let sample = CompoundSample {
            timestamp_ms: 1500,
            accel: Some([1.0, 2.0, 3.0]),
            gyro: None,
        };
        let line = sample.to_string();
        assert_eq!(line, "1500, 1, 2, 3, null, null, null");
        assert_eq!(line.split(", ").count(), 7);
    }
}
