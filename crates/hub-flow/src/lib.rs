//! Hub flows: JSON-configured sets of hub clients and the nodes bound to them.

pub mod config;
pub mod error;
pub mod flow;

pub use config::{ClientConfig, FlowConfig, InputConfig, OutputConfig, ResponseConfig};
pub use error::FlowError;
pub use flow::{Flow, InNode, OutNode};
