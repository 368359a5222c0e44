pub mod call;
pub mod span;
