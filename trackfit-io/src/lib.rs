//! trackfit-io: Event files and geometry export.
//!
//! Events are stored as JSON Lines, one [`Event`](trackfit_core::Event)
//! per line, and read through a memory map. The tracking geometry can be
//! exported to GDML for visualisation.
//!

mod error;
pub mod gdml;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use gdml::{GdmlWriter, ALUMINIUM};
pub use reader::{EventFileReader, MappedFileReader};
pub use writer::EventFileWriter;
