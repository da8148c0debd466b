//! # Tiki (Access-Ticket Broker)
//!
//! `tiki` keeps track of who is logged in and decides what they may do. Every
//! request passes the auth gate, which validates the caller's identity token
//! against the OIDC provider and renews it silently when it has expired.
//!
//! ## Sessions
//!
//! A session is one login: the identity token, its refresh token and some
//! bookkeeping. Sessions live in a durable store (`PostgreSQL`, or memory for
//! local work). Each instance keeps a read-through cache split into four
//! partitions: `all`, `active`, `expired` and `revoked`. An empty cached
//! partition counts as a miss, so reads always fall back to the store.
//!
//! ## Cluster
//!
//! Instances find each other through static configuration or the platform
//! API and gossip over UDP. The wire format is plain text:
//!
//! - `000`: join
//! - `001`: join acknowledged
//! - `upd,<partition>`: reload that partition from the store
//!
//! Gossip is advisory. A lost message leaves a peer serving from its cache
//! until its next miss, never with a wrong answer from the store.
//!
//! ## Authorization
//!
//! Permissions come from group membership. Members of `tikiadmins` may do
//! anything, read-only operations are open to everyone, and banned
//! identities are denied everything and lose their sessions.

pub mod api;
pub mod auth;
pub mod cli;
pub mod cluster;
pub mod model;
pub mod permission;
pub mod session;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
