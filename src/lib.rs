//! Locally cached, continuously refreshed mirrors of GitHub repositories.
//!
//! [`cache::RepoCache`] owns the mirrors: it clones on first use, hands out
//! read handles and disposable workspace copies, and refreshes or evicts
//! mirrors on behalf of [`daemon::sync`]. The daemon exposes the cache over a
//! JSON-RPC control socket spoken by [`cli::Client`].

pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod daemon;
pub mod events;
pub mod github;
pub mod protocol;
pub mod types;
