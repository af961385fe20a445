// =============================================================================
// Regime Allocator -- regime-switching signal core
// =============================================================================
//
// Bars in, target weights out. Each bar flows through:
//
//   market_data -> indicators -> regime -> strategy -> router
//                                                 |-> exit / risk / reconcile
//
// Order placement, fills and account state belong to an external execution
// collaborator; `paper` provides a simulated one for replays and tests.
// =============================================================================

pub mod diagnostics;
pub mod exit;
pub mod indicators;
pub mod market_data;
pub mod paper;
pub mod position_engine;
pub mod reconcile;
pub mod regime;
pub mod risk;
pub mod router;
pub mod runtime_config;
pub mod strategy;
pub mod types;

pub use diagnostics::{BarOutput, TelemetrySink};
pub use router::SignalRouter;
pub use runtime_config::RuntimeConfig;
