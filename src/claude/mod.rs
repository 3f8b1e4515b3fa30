//! Claude Code CLI integration

mod error;
mod locate;
mod message;
mod parser;
mod process;
mod types;
mod value;


pub use error::*;
pub use locate::CliLocator;
pub use message::*;
pub use parser::*;
pub use process::*;
pub use types::*;
pub use value::JsonValue;
