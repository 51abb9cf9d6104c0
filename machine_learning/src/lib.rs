pub mod arch;
pub mod error;
pub mod params;

pub use arch::{Architecture, ArchitectureTag, Network, build};
pub use error::{MlErr, Result};
pub use params::StateDict;
