pub mod activations;
mod builder;
pub mod efficientnet;
pub mod layers;
mod network;
pub mod resnet;

pub use builder::{Architecture, ArchitectureTag, build};
pub use network::Network;
