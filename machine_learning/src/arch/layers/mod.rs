mod batch_norm;
mod conv;
mod conv_norm_act;
mod linear;
mod pool;
mod squeeze_excitation;

pub use batch_norm::BatchNorm2d;
pub use conv::{Conv2d, ConvSpec};
pub use conv_norm_act::ConvNormAct;
pub use linear::Linear;
pub use pool::{global_avg_pool, max_pool2d};
pub use squeeze_excitation::SqueezeExcitation;
