mod calibration_results;
mod messages;
