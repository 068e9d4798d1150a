//! Backend selection, the hardware seam and software cross-validation.

mod controller;
mod hardware;
mod validate;

pub use controller::{BackendController, BackendPreference, BackendState, ControllerConfig};
pub use hardware::{BlasId, EmulatedHardware, HardwareBackend, Instance};
pub use validate::{
    BackendId, ParityReport, ValidationKey, ValidationRecord, Validator, PARITY_RMSE_THRESHOLD,
};
