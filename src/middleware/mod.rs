pub mod transformation;

pub use transformation::{OutboundRequest, TransformEngine};
