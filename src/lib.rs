//! Streaming fall-detection pipeline: synchronized accelerometer/gyroscope
//! samples are windowed, scored against a remote reconstruction service, and
//! anomalous windows raise a device-local alert. A loosely coupled upload
//! queue batches the raw record stream and drains it to remote storage when
//! connectivity allows.

pub mod alert;
pub mod scorer;
pub mod sensors;
pub mod status;
pub mod synchronizer;
pub mod uploader;
pub mod windower;
