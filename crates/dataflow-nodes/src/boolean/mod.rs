//! Boolean logic nodes

mod xor;

pub use xor::XorNode;
