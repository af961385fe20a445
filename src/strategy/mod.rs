// =============================================================================
// Strategy Module
// =============================================================================
//
// Turns a classified regime into a direction and a size:
// - `action_table` maps (zone, confidence, price features) to an action
// - `sizer` maps (confidence, rule scale, cap) to a target weight

pub mod action_table;
pub mod sizer;

pub use action_table::{ActionRule, ActionTable, Decision, EntryFilter, TradeAction};
pub use sizer::{IssuedTarget, PositionSizer, SizingConfig};
