//! Cycle management
//!
//! This module handles split configuration, the rotation counter, its lock,
//! and the assignment service built on top of them.

pub mod config;
pub mod lock;
pub mod rules;
pub mod service;
pub mod state;
