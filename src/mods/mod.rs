//! src/mods/mod.rs
//! One file per run mode. Both feed the same `BeepController`.

pub mod listen;
pub mod replay;
