//! Backend parity: the sequential backend and every parallel device must
//! follow the same pivot path to the same verdict.

#[path = "../common/mod.rs"]
mod common;

mod generated;
mod helpers;
mod scenarios;
