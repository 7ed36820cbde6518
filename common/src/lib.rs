//! Types shared by the camera reader and the grabber binary.

pub mod config;
pub mod frame;
