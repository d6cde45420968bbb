//! Output nodes
//!
//! Output nodes are the roots of a calculation; each publishes one result.

mod number_output;

pub use number_output::NumberOutputNode;

use dataflow_engine::form::form_str;
use dataflow_engine::FormValues;

/// Non-empty result name from the form
pub(crate) fn result_name(form: &FormValues) -> Option<&str> {
    form_str(form, "name").filter(|name| !name.trim().is_empty())
}
