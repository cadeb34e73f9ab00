//! Per-client JSONL logging.
//!
//! Several clients can share one logs directory (two devices under test, a
//! CLI next to a background sync). Each client appends to its own file, so
//! no two processes ever write the same file.
//!
//! ```text
//! logs/
//! └── raw/                          # one file per client per day
//!     ├── 2026-10-18_laptop.jsonl
//!     └── 2026-10-18_phone.jsonl
//! ```
//!
//! ```ignore
//! use linksync_core::logging::JsonlLayer;
//! use tracing_subscriber::prelude::*;
//!
//! let layer = JsonlLayer::new("./logs", "laptop")?;
//! tracing_subscriber::registry()
//!     .with(layer)
//!     .with(tracing_subscriber::fmt::layer())
//!     .init();
//! ```
//!
//! Entries are plain JSON lines, so `jq` works on them directly:
//!
//! ```bash
//! jq 'select(.level == "warn" and .fields.op != null)' logs/raw/*.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::{LevelCounts, LogEntry};
pub use layer::JsonlLayer;
pub use writer::{read_entries, summarize, ClientLogWriter};
