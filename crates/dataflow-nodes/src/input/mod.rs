//! Input nodes
//!
//! Nodes providing values entered in their form.

mod boolean_input;
mod number_input;

pub use boolean_input::BooleanInputNode;
pub use number_input::NumberInputNode;
