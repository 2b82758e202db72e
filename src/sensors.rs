use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::process::Command;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccelData {
    pub timestamp_ms: i64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GyroData {
    pub timestamp_ms: i64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl AccelData {
    pub fn axes(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl GyroData {
    pub fn axes(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

pub async fn accel_loop(tx: Sender<AccelData>) {
    let mut interval = interval(Duration::from_millis(20)); // ~50Hz sampling
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        // Try to read from termux-sensor, fall back to mock data
        let accel = match read_accelerometer() {
            Some(data) => data,
            None => mock_accel_data(),
        };

        match tx.try_send(accel) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    eprintln!("[accel] {} samples", sample_count);
                }
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                eprintln!("[accel] Channel closed after {} samples", sample_count);
                break;
            }
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

pub async fn gyro_loop(tx: Sender<GyroData>) {
    let mut interval = interval(Duration::from_millis(20)); // ~50Hz sampling
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let gyro = match read_gyroscope() {
            Some(data) => data,
            None => mock_gyro_data(),
        };

        match tx.try_send(gyro) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    eprintln!("[gyro] {} samples", sample_count);
                }
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                eprintln!("[gyro] Channel closed after {} samples", sample_count);
                break;
            }
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

fn read_accelerometer() -> Option<AccelData> {
    // Format: Accelerometer event: x=X, y=Y, z=Z, accuracy=0, timestamp=TS
    match Command::new("termux-sensor")
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg("accelerometer")
        .output()
    {
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stdout);
            parse_accel_output(&text)
        }
        Err(_) => None,
    }
}

fn read_gyroscope() -> Option<GyroData> {
    match Command::new("termux-sensor")
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg("gyroscope")
        .output()
    {
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stdout);
            parse_gyro_output(&text)
        }
        Err(_) => None,
    }
}

fn parse_accel_output(output: &str) -> Option<AccelData> {
    let (x, y, z) = parse_axis_triple(output)?;
    Some(AccelData {
        timestamp_ms: current_millis(),
        x,
        y,
        z,
    })
}

fn parse_gyro_output(output: &str) -> Option<GyroData> {
    let (x, y, z) = parse_axis_triple(output)?;
    Some(GyroData {
        timestamp_ms: current_millis(),
        x,
        y,
        z,
    })
}

fn parse_axis_triple(output: &str) -> Option<(f32, f32, f32)> {
    // Example: "Accelerometer event: x=0.5, y=0.3, z=9.8, accuracy=0, timestamp=1234567890"
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for part in output.split(',') {
        let part = part.trim();
        if let Some(val_str) = part.strip_prefix("x=") {
            x = val_str.trim().parse().ok();
        } else if let Some(val_str) = part.strip_prefix("y=") {
            y = val_str.trim().parse().ok();
        } else if let Some(val_str) = part.strip_prefix("z=") {
            z = val_str.trim().parse().ok();
        }
    }

    Some((x?, y?, z?))
}

fn mock_accel_data() -> AccelData {
    use std::f32::consts::PI;
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let t = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as f32 * 0.02;

    AccelData {
        timestamp_ms: current_millis(),
        x: (t * 2.0 * PI).sin() * 0.5,
        y: (t * 2.0 * PI).cos() * 0.3,
        z: 9.81 + (t * PI).sin() * 0.1,
    }
}

fn mock_gyro_data() -> GyroData {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let t = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as f32 * 0.02;

    GyroData {
        timestamp_ms: current_millis(),
        x: (t * 0.5).sin() * 0.05,
        y: (t * 0.3).cos() * 0.03,
        z: (t * 1.0).sin() * 0.1,
    }
}

pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accel_output() {
        let text = "Accelerometer event: x=0.5, y=0.3, z=9.8, accuracy=0, timestamp=1234567890";
        let accel = parse_accel_output(text).expect("should parse");
        assert_eq!(accel.x, 0.5);
        assert_eq!(accel.y, 0.3);
        assert_eq!(accel.z, 9.8);
    }

    #[test]
    fn test_parse_rejects_missing_axis() {
        let text = "Gyroscope event: x=0.1, y=0.2, accuracy=0";
        assert!(parse_gyro_output(text).is_none());
    }

    #[test]
    fn test_mock_data_advances() {
        let a = mock_accel_data();
        let b = mock_accel_data();
        // Counter-driven sinusoid, consecutive samples differ
        assert!(a.x != b.x || a.y != b.y || a.z != b.z);
    }
}
