//! Device requests and device node inspection.

pub mod access;
pub mod amdgpu;
pub mod mount;
pub mod parser;

pub use access::DeviceAccess;
pub use mount::{DeviceMountRequest, DeviceType};
pub use parser::{parse_request, DeviceParser, DeviceRequest};
