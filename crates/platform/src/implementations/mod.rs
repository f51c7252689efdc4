//! Platform backends

pub mod adb;
