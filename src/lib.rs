//! layerscope - Dissect capture files into protocol layer trees.
//!
//! The engine lives in [`layerscope_core`]; this crate adds the
//! command-line front end.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use layerscope_core::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let session = Session::new(Arc::new(default_registry()), SessionConfig::default());
//!     let predicate = compile("tcp.dst == 80", &AliasTable::new())?;
//!     for raw in CaptureReader::open("capture.pcap")? {
//!         let frame = session.ingest(raw?)?;
//!         if predicate.matches(&frame) {
//!             println!("{}", frame.protocol_path());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
