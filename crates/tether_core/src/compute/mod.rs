//! Data-parallel execution service: typed shared buffers, packed bit
//! flags and kernel dispatch.

mod bits;
mod buffer;
mod device;

pub use bits::ActiveBits;
pub use buffer::{Buffer, Element};
pub use device::{ComputeDevice, Kernel};
