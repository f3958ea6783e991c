pub mod mock;
pub mod registry;
pub mod traits;
pub mod types;

pub use registry::{AdapterRef, DriverLease, DriverRegistry};
pub use traits::{DeviceSession, DriverAdapter};
pub use types::{
    CapabilitySet, DeviceDescriptor, DriverDescriptor, LoadState, Range, SampleBlock,
    TaskParameters, TaskType,
};
