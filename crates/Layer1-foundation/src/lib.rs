//! # sysrow-foundation
//!
//! Foundation layer for SysRow:
//! - Error: one error taxonomy shared by every crate
//! - Config: `SysrowConfig`, loaded from the data directory
//! - Storage: `DataLayout` (the data directory tree) and `JsonStore`
//!   (one JSON file per record, atomic writes)
//!
//! ## Data directory
//!
//! ```text
//! ~/.sysrow/
//! ├── config.json
//! ├── tasks/<id>.json
//! ├── groups/<id>.json
//! └── logs/<id>.{stdout,stderr,app}.log
//! ```

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{default_data_dir, ConfigOverlay, SysrowConfig, SYSROW_CONFIG_FILE, SYSROW_HOME_ENV};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{DataLayout, JsonStore, Listing, SkippedRecord};
