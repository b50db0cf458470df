//! Bandwidth estimation integration tests.


mod capacity;
mod config;
mod determinism;
mod grouping;
mod probes;
mod wrap;
