//! Chain definitions: compilation of stored records into the form the
//! engine runs against, and YAML import.

pub mod compile;
pub mod definition;

pub use compile::{CompiledChain, compile_chain};
