pub mod calibration_result;
pub mod message;

pub use calibration_result::CalibrationResult;
pub use message::Message;
