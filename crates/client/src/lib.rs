//! Headless client for the Coinstreak game.
//!
//! The pieces mirror the sync design: [`transport`] keeps one
//! auto-reconnecting channel to the server-held snapshot, [`scheduler`]
//! decides *when* a changed snapshot is worth a write, and [`session`] runs
//! the single-threaded simulation loop that ties them to the engine. The
//! simulation never blocks on the network; with no server at all the game is
//! fully playable and simply stops syncing.

pub mod identity;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use session::{PlayerCommand, SessionHandle, SessionUpdate, SyncConfig};
