use std::process::Command;
use thiserror::Error;

const VIBRATION_DURATION_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Vibration failed: {0}")]
    Vibration(String),

    #[error("Audio cue failed: {0}")]
    Audio(String),
}

/// Device-local alarm: a long vibration pulse plus an audio cue.
///
/// Fire-and-forget; a failure here is reported to the caller for logging and
/// never stops the scoring stream.
pub struct AlertTrigger {
    sound_path: Option<String>,
}

impl AlertTrigger {
    pub fn new(sound_path: Option<String>) -> Self {
        AlertTrigger { sound_path }
    }

    /// React to an anomalous window. The vibration runs first; the audio cue
    /// is skipped when no sound file is configured.
    pub fn on_anomalous(&self) -> Result<(), AlertError> {
        vibrate(VIBRATION_DURATION_MS)?;

        if let Some(path) = &self.sound_path {
            play_sound(path)?;
        }

        Ok(())
    }
}

fn vibrate(duration_ms: u64) -> Result<(), AlertError> {
    let status = Command::new("termux-vibrate")
        .arg("-d")
        .arg(duration_ms.to_string())
        .arg("-f") // vibrate even in silent mode
        .status()
        .map_err(|e| AlertError::Vibration(e.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        Err(AlertError::Vibration(format!("exit status {}", status)))
    }
}

fn play_sound(path: &str) -> Result<(), AlertError> {
    let status = Command::new("termux-media-player")
        .arg("play")
        .arg(path)
        .status()
        .map_err(|e| AlertError::Audio(e.to_string()))?;

    if status.success() {
        Ok(())
    } else {
        Err(AlertError::Audio(format!("exit status {}", status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_error_display() {
        let err = AlertError::Vibration("no device".to_string());
        assert!(err.to_string().contains("Vibration failed"));

        let err = AlertError::Audio("missing file".to_string());
        assert!(err.to_string().contains("Audio cue failed"));
    }
}
