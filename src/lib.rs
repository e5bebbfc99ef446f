#![no_std]

pub mod firmware;

// Unit tests live in #[cfg(test)] modules alongside the code they cover
// (math, current control, calibration, rotor observer, timing, ...) rather
// than in a top-level tests/ directory, since most of this crate's logic is
// pure enough to not need the `host-mock` hardware fakes at all.

