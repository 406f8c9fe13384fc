//! Services shared by the client front ends

mod device;

pub use device::DeviceStore;
