//! Time nodes

mod construct;

pub use construct::TimeConstructNode;
