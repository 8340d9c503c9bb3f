//! CLI output formatting
//!
//! Provides human-readable terminal display for assignments, cycle state,
//! simulations and doctor reports.

pub mod display;

pub use display::render_assignment;
pub use display::render_diagnostic_report;
pub use display::render_failure;
pub use display::render_simulation;
pub use display::render_state;
