// =============================================================================
// Exit Management Module
// =============================================================================
//
// Per-position exits evaluated every bar: hard and trailing stops, profit
// taking, regime reversal and Transition de-risking.

pub mod overlay;
pub mod trailing;

pub use overlay::{ExitConfig, ExitReason, ExitSignal, RiskOverlay};
pub use trailing::TrailingStopConfig;
