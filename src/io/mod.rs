//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - draw / prediction / derived-table exports (`export`)
//! - posterior JSON read/write (`posterior`)

pub mod export;
pub mod ingest;
pub mod posterior;

pub use export::*;
pub use ingest::*;
pub use posterior::*;
