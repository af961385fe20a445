// =============================================================================
// Market Data Module
// =============================================================================
//
// Bounded per-symbol bar windows and the read-only market context that every
// indicator evaluates against.

pub mod bar_window;

pub use bar_window::{BarWindow, MarketContext};
