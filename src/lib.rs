pub mod candidates;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dedup;
pub mod density;
pub mod engine;
pub mod error;
pub mod host;
pub mod ir;
pub mod layout;
pub mod layout_dump;
pub mod matching;
pub mod persist;
pub mod records;
pub mod render;
pub mod scheduler;
pub mod text;

#[cfg(feature = "cli")]
pub use cli::run;
pub use config::{EngineConfig, LayerKind, load_config};
pub use engine::{LabelEdit, LabelEngine, LabelRef, OpResult, PassReport, TickReport};
pub use error::{EngineError, StoreError};
pub use host::{MapHost, Scene};
pub use persist::{DurableStore, FileStore, MemoryStore, PersistedPosition, PositionMap};
