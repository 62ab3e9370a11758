//! Core module containing the session engine
//!
//! This module provides:
//! - Port abstraction and the serial backend
//! - Line reassembly of the device byte stream
//! - Sample decoding
//! - Session state machine and controller
//! - Event queue and the session loop

pub mod console;
pub mod controller;
pub mod event;
pub mod line;
pub mod runtime;
pub mod sample;
pub mod state;
pub mod transport;
