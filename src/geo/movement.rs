//! Movement detection over raw position fixes.
//!
//! The watcher keeps the last known cell and emits only on a true cell
//! transition. Fixes inside the current cell produce nothing; that is the
//! sole debounce mechanism, any time/distance throttling belongs to the
//! position-fix source.

use crate::geo::cell::{self, SpatialCell};
use crate::session::RealtimeEventSession;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// A raw position fix from the device location source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Typed failure of the position-fix source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("no position fix available")]
    Unavailable,
}

#[derive(Debug, Default)]
pub struct MovementWatcher {
    last_cell: Option<SpatialCell>,
}

impl MovementWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_cell(&self) -> Option<&SpatialCell> {
        self.last_cell.as_ref()
    }

    /// Feed one position fix.
    ///
    /// Returns the new cell on a significant move, `None` otherwise. The
    /// cell is recomputed only here, never speculatively.
    pub fn observe(&mut self, fix: &PositionFix) -> Option<SpatialCell> {
        let candidate = cell::encode(fix.latitude, fix.longitude);
        if cell::is_significant_move(self.last_cell.as_ref(), &candidate) {
            tracing::debug!(cell = %candidate, "cell transition");
            self.last_cell = Some(candidate.clone());
            Some(candidate)
        } else {
            None
        }
    }
}

/// Pump position fixes into the session's subscription target.
///
/// Source failures are surfaced as typed values on the channel; the watcher
/// synthesizes no cell for them and emits nothing. Runs until the fix
/// channel closes.
pub async fn drive_session(
    mut fixes: UnboundedReceiver<Result<PositionFix, PositionError>>,
    session: RealtimeEventSession,
) {
    let mut watcher = MovementWatcher::new();
    while let Some(fix) = fixes.recv().await {
        match fix {
            Ok(fix) => {
                if let Some(cell) = watcher.observe(&fix) {
                    if let Err(e) = session.set_target_cell(cell) {
                        tracing::warn!(error = %e, "failed to hand cell to session");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "position source failure, no cell emitted");
            }
        }
    }
    tracing::debug!("position fix source closed");
}
