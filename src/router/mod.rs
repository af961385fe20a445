// =============================================================================
// Signal Router Module
// =============================================================================
//
// Owns the per-bar pipeline: per-symbol slots (indicator + regime state), the
// portfolio constraint pass and the `SignalRouter` that ties them to the
// position book, exits, drawdown breaker and reconciliation.

pub mod portfolio;
pub mod signal_router;
pub mod slot;

pub use portfolio::{apply_constraints, ConstraintReport, HedgeConfig, PortfolioConstraints, Proposal};
pub use signal_router::SignalRouter;
pub use slot::{SlotPolicy, SymbolEvaluation, SymbolSlot};
