// =============================================================================
// Risk Engine -- portfolio drawdown circuit breaker
// =============================================================================
//
//   drawdown = 1 - equity / peak_equity
//
// The peak only moves when equity makes a new high. The breaker trips once
// drawdown exceeds `max_drawdown` and lifts once it has recovered to
// `recovery_drawdown` or better. While tripped, no new entries or increases are
// allowed; existing positions are never force-closed by the breaker.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownConfig {
    /// Drawdown (fraction) above which entries are blocked.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    /// Drawdown at or below which the breaker lifts.
    #[serde(default = "default_recovery_drawdown")]
    pub recovery_drawdown: f64,
}

fn default_max_drawdown() -> f64 {
    0.15
}
fn default_recovery_drawdown() -> f64 {
    0.05
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            max_drawdown: default_max_drawdown(),
            recovery_drawdown: default_recovery_drawdown(),
        }
    }
}

impl DrawdownConfig {
    pub fn new(max_drawdown: f64, recovery_drawdown: f64) -> Self {
        Self {
            max_drawdown,
            recovery_drawdown,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.max_drawdown > 0.0 && self.max_drawdown < 1.0) {
            anyhow::bail!("max_drawdown must be within (0, 1), got {}", self.max_drawdown);
        }
        if !(self.recovery_drawdown >= 0.0 && self.recovery_drawdown < self.max_drawdown) {
            anyhow::bail!(
                "recovery_drawdown ({}) must be within [0, max_drawdown ({}))",
                self.recovery_drawdown,
                self.max_drawdown
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Portfolio state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub equity: f64,
    pub peak_equity: f64,
    pub drawdown: f64,
}

impl PortfolioState {
    pub fn new(equity: f64) -> Self {
        Self {
            equity,
            peak_equity: equity,
            drawdown: 0.0,
        }
    }

    /// Mark equity and recompute drawdown.
    pub fn update(&mut self, equity: f64) {
        if !equity.is_finite() {
            return;
        }
        self.equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.drawdown = if self.peak_equity > 0.0 {
            (1.0 - equity / self.peak_equity).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

// ---------------------------------------------------------------------------
// Risk events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskEventKind {
    BreakerTripped,
    BreakerLifted,
}

impl std::fmt::Display for RiskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BreakerTripped => write!(f, "BREAKER_TRIPPED"),
            Self::BreakerLifted => write!(f, "BREAKER_LIFTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: RiskEventKind,
    pub drawdown: f64,
    pub limit: f64,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Drawdown breaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DrawdownBreaker {
    cfg: DrawdownConfig,
    state: PortfolioState,
    tripped: bool,
}

impl DrawdownBreaker {
    pub fn new(cfg: DrawdownConfig, initial_equity: f64) -> Self {
        info!(
            equity = format!("{:.2}", initial_equity),
            max_drawdown = format!("{:.4}", cfg.max_drawdown),
            recovery_drawdown = format!("{:.4}", cfg.recovery_drawdown),
            "DrawdownBreaker initialised"
        );
        Self {
            cfg,
            state: PortfolioState::new(initial_equity),
            tripped: false,
        }
    }

    pub fn portfolio(&self) -> &PortfolioState {
        &self.state
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// New entries (or increases) are allowed only while not tripped.
    pub fn allows_entries(&self) -> bool {
        !self.tripped
    }

    /// Mark equity for the bar. Returns the state change, if any.
    pub fn update(&mut self, equity: f64, timestamp: DateTime<Utc>) -> Option<RiskEvent> {
        self.state.update(equity);
        let dd = self.state.drawdown;

        debug!(
            equity = format!("{:.2}", self.state.equity),
            peak = format!("{:.2}", self.state.peak_equity),
            drawdown = format!("{:.4}", dd),
            tripped = self.tripped,
            "Portfolio marked"
        );

        if !self.tripped && dd > self.cfg.max_drawdown {
            self.tripped = true;
            let message = format!(
                "Drawdown breaker tripped: {:.2}% drawdown (limit {:.2}%)",
                dd * 100.0,
                self.cfg.max_drawdown * 100.0
            );
            warn!("{}", message);
            return Some(RiskEvent {
                timestamp,
                kind: RiskEventKind::BreakerTripped,
                drawdown: dd,
                limit: self.cfg.max_drawdown,
                message,
            });
        }

        if self.tripped && dd <= self.cfg.recovery_drawdown {
            self.tripped = false;
            let message = format!(
                "Drawdown breaker lifted: {:.2}% drawdown (recovery {:.2}%)",
                dd * 100.0,
                self.cfg.recovery_drawdown * 100.0
            );
            info!("{}", message);
            return Some(RiskEvent {
                timestamp,
                kind: RiskEventKind::BreakerLifted,
                drawdown: dd,
                limit: self.cfg.recovery_drawdown,
                message,
            });
        }
        None
    }
}
