//! Cache lifecycle: shutdown registration and sweep, memory pressure, and
//! periodic maintenance.

pub mod maintenance;
pub mod memory;
pub mod registry;
pub mod shutdown;

pub use maintenance::*;
pub use memory::*;
pub use registry::*;
pub use shutdown::*;
