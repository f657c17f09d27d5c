pub mod ble;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod series;
pub mod session;
pub mod sim;
pub mod state;
pub mod telemetry;
pub mod types;

pub use controller::*;
pub use types::*;
