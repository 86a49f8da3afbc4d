//! Peer registry, presence history, and response composition for InterNIMS.
//!
//! Two clocks run side by side:
//!
//! - [`peers`] holds one liveness snapshot per site. A snapshot is live for
//!   two minutes after the site's last announcement and is hard-deleted by
//!   [`sweep_expired_peers`] once it falls out of that window.
//! - [`history`] keeps a long-horizon ledger. Each site has at most one open
//!   record, refreshed on every announcement and closed by
//!   [`sweep_expired_history`] after a day of silence. Closed records are
//!   never reopened.
//!
//! [`compose`] turns the live peer set into the body returned to an
//! announcing site. [`run_sweeps`] is the single entry point for both
//! expiry sweeps.
//!
//! Nothing here authenticates. Callers must only reach [`upsert_peer`] and
//! [`touch_history`] after the announcement has been allowed.

pub mod compose;
pub mod history;
pub mod peers;
pub mod sweep;

pub use compose::{
    compose_response, remotes_overview, AnnouncementResponse, PeerView, RemoteStatus,
    RemotesOverview, SiteRef,
};
pub use history::{
    get_open_history, history_threshold, list_history, sweep_expired_history, touch_history,
    PeerHistoryRecord,
};
pub use peers::{
    get_live_peer, list_live_peers, sweep_expired_peers, upsert_peer, PeerRecord, PeerUpdate,
};
pub use sweep::{run_sweeps, SweepReport};

use thiserror::Error;

/// Errors from registry storage.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("history threshold must be at least one day, got {0}")]
    InvalidThreshold(i64),
}
