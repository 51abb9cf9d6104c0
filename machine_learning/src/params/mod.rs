pub mod init;
mod layout;
mod state_dict;

pub use layout::{ParamInit, ParamLayout, ParamSpec, join_key};
pub use state_dict::StateDict;
