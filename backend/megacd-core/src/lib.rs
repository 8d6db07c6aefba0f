//! The full Mega Drive + Mega CD machine: Sub-CPU bus and WORD-RAM arbitration, CDC
//! sector pipeline, CD-DA playback, RF5C164 PCM, the graphics ASIC, the BIOS-call
//! interface, and the frame loop binding it all to the Mega Drive components.

pub mod api;
pub mod audio;
mod bios;
mod cdc;
mod cdda;
mod graphics;
mod memory;
mod rf5c164;
#[cfg(test)]
mod testutil;

pub use api::{ConsoleRegion, MegaCd, MegaCdConfig};
pub use memory::MachineState;
