//! levelwatch demo binary support: CLI definitions and demo wiring.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cli;
pub mod demo;
