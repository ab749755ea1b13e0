//! Engine configuration.
//!
//! Read from `tern.toml`. Every field has a default, so a missing file or an
//! empty one yields a working configuration.

pub mod parser;
pub mod schema;
pub mod store;

pub use parser::{parse_tern_toml, parse_tern_toml_str, to_toml};
pub use schema::{EngineConfig, LabelConfig, StepConfig};
pub use store::ConfigStore;
