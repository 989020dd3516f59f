//! Config - SysRow settings
//!
//! - `sysrow.rs` - SysrowConfig (data directory, retention, cancellation)

mod sysrow;

pub use sysrow::{default_data_dir, ConfigOverlay, SysrowConfig, SYSROW_CONFIG_FILE, SYSROW_HOME_ENV};
