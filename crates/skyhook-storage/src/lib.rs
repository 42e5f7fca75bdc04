//! Skyhook Storage Crate
//!
//! Persistent telemetry storage for the gateway, backed by redb.
//!
//! ## Example
//!
//! ```rust,no_run
//! use skyhook_storage::TelemetryStore;
//! use skyhook_core::TelemetrySample;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TelemetryStore::open("./data/telemetry.redb")?;
//!
//!     let mut sample = TelemetrySample::new(1234567890000, 1234567890100);
//!     sample.altitude = Some(87.5);
//!     store.append("1581F5BKD23290100AXXXX", &sample).await?;
//!
//!     let recent = store.latest("1581F5BKD23290100AXXXX").await?;
//!     println!("{:?}", recent);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod telemetry;

pub use error::{Error, Result};
pub use telemetry::TelemetryStore;

/// Version of the storage crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
