use crate::windower::Window;
use std::time::Duration;
use thiserror::Error;

/// Scoring errors. None of these are fatal to the pipeline; the window that
/// hit the error is dropped and the stream continues.
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Detector unavailable: {0}")]
    Unavailable(String),

    #[error("Reconstruction length mismatch: sent {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
}

/// Outcome of scoring one window.
#[derive(Clone, Debug)]
pub struct ScoreResult {
    pub reconstructed: Vec<f32>,
    pub error: f32,
    pub is_anomalous: bool,
}

/// HTTP client for the remote reconstruction service.
///
/// Endpoints: `GET /size` (window length in samples), `GET /threshold`
/// (anomaly cutoff, integer or float), `POST /compute` (JSON float array in,
/// equal-length JSON float array out).
pub struct DetectorClient {
    client: reqwest::Client,
    base_url: String,
}

impl DetectorClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        DetectorClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn size(&self) -> Result<usize, ScoreError> {
        let value: serde_json::Number = self.get_json("/size").await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| ScoreError::Unavailable(format!("Bad size value: {}", value)))
    }

    /// The wire allows an integer or a float here.
    pub async fn threshold(&self) -> Result<f32, ScoreError> {
        let value: serde_json::Number = self.get_json("/threshold").await?;
        value
            .as_f64()
            .map(|n| n as f32)
            .ok_or_else(|| ScoreError::Unavailable(format!("Bad threshold value: {}", value)))
    }

    pub async fn compute(&self, input: &[f32]) -> Result<Vec<f32>, ScoreError> {
        let url = format!("{}/compute", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| ScoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoreError::Unavailable(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<Vec<f32>>()
            .await
            .map_err(|e| ScoreError::Unavailable(e.to_string()))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Number, ScoreError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoreError::Unavailable(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<serde_json::Number>()
            .await
            .map_err(|e| ScoreError::Unavailable(e.to_string()))
    }
}

/// Scores windows against the remote reconstruction.
///
/// Window size and threshold are fetched once at connect time, matching the
/// detector's advertised configuration for the life of the run.
pub struct AnomalyScorer {
    client: DetectorClient,
    window_size: usize,
    threshold: f32,
}

impl AnomalyScorer {
    /// Query the detector for its window size and threshold.
    pub async fn connect(base_url: &str) -> Result<Self, ScoreError> {
        let client = DetectorClient::new(base_url);
        let window_size = client.size().await?;
        let threshold = client.threshold().await?;
        log::info!(
            "Detector at {}: window size {}, threshold {}",
            base_url,
            window_size,
            threshold
        );

        Ok(AnomalyScorer {
            client,
            window_size,
            threshold,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Send the window out for reconstruction and classify it.
    pub async fn score(&self, window: &Window) -> Result<ScoreResult, ScoreError> {
        let input = window.flatten();
        let output = self.client.compute(&input).await?;
        evaluate(&input, &output, self.threshold)
    }
}

/// Compare a window against its reconstruction: textbook MSE in f32, anomalous
/// when the error exceeds the threshold.
pub fn evaluate(input: &[f32], output: &[f32], threshold: f32) -> Result<ScoreResult, ScoreError> {
    if input.len() != output.len() {
        return Err(ScoreError::LengthMismatch {
            expected: input.len(),
            got: output.len(),
        });
    }

    let error = mean_squared_error(input, output);
    Ok(ScoreResult {
        reconstructed: output.to_vec(),
        error,
        is_anomalous: error > threshold,
    })
}

fn mean_squared_error(input: &[f32], output: &[f32]) -> f32 {
    let squared_sum: f32 = input
        .iter()
        .zip(output.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    squared_sum / input.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mse_textbook_example() {
        let input = [1.0, 2.0, 3.0];
        let output = [1.0, 2.0, 5.0];
        // (0 + 0 + 4) / 3
        assert_relative_eq!(mean_squared_error(&input, &output), 4.0 / 3.0);
    }

    #[test]
    fn test_identical_vectors_score_zero() {
        let input = [0.5, -1.5, 9.81];
        assert_eq!(mean_squared_error(&input, &input), 0.0);
    }

    #[test]
    fn test_error_above_threshold_is_anomalous() {
        let result = evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0], 1.0).unwrap();
        assert_relative_eq!(result.error, 4.0 / 3.0);
        assert!(result.is_anomalous);
    }

    #[test]
    fn test_error_at_or_below_threshold_is_normal() {
        // Strict inequality: error == threshold is not anomalous
        let result = evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0], 4.0 / 3.0).unwrap();
        assert!(!result.is_anomalous);

        let result = evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0], 2.0).unwrap();
        assert!(!result.is_anomalous);
    }

    #[test]
    fn test_length_mismatch_is_an_error_not_a_panic() {
        let err = evaluate(&[1.0, 2.0, 3.0], &[1.0, 2.0], 1.0).unwrap_err();
        match err {
            ScoreError::LengthMismatch { expected, got } => {
                assert_eq!(expected, 3);
                assert_eq!(got, 2);
            }
            other => panic!("expected LengthMismatch, got {}", other),
        }
    }

    #[test]
    fn test_reconstruction_is_returned() {
        let result = evaluate(&[1.0, 2.0], &[1.5, 2.5], 10.0).unwrap();
        assert_eq!(result.reconstructed, vec![1.5, 2.5]);
    }
}
