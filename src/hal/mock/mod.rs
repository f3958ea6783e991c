pub mod simulated;

pub use simulated::{FaultPlan, SimulatedDriver, SimulatedStats};
