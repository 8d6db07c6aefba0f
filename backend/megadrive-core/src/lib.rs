//! Mega Drive hardware components: VDP, YM2612, SN76489, I/O ports, cartridge
//! plumbing, and the cycle accounting that binds them. The full machine (including the
//! Mega CD side and the bus dispatchers) is assembled in `megacd-core`.

pub mod cartridge;
pub mod cpu;
pub mod input;
pub mod psg;
pub mod timing;
pub mod vdp;
pub mod ym2612;
