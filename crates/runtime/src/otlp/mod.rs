pub mod encode;

pub use encode::{encode_spans, export_request};
