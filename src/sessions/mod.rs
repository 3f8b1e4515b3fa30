//! Session continuity across turns

mod registry;

pub use registry::SessionRegistry;
