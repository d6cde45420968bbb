//! Number nodes

mod format_number;

pub use format_number::{format_number, FormatNumberNode, NumberFormat, OutputStyle};
