//! Live broker core.
//!
//! The layer between a strategy and a venue adapter. Strategies express
//! targets (`order_target_percent`, `order_target_value`); this crate turns
//! them into concrete lotted submissions while guaranteeing that transient
//! failures, lost callbacks, disconnects and racing order states never cause
//! silent cash leaks, double-spends or runaway exposure.
//!
//! # Moving parts
//!
//! - **Virtual cash ledger** — every in-flight BUY holds a reservation of
//!   `size x price x safety_multiplier` against settled cash, so parallel
//!   intents cannot spend the same dollar twice.
//! - **Order tracker** — active buys, pending sells, buffered rejection
//!   retries and the deferred-buy queue, plus a bounded terminal-state
//!   memory used when snapshots go dark.
//! - **Reconciler** — heals the tracker against the venue's authoritative
//!   pending snapshot, with hysteresis against flaky empty snapshots.
//! - **Self-heal loop** — throttled heartbeat driving snapshot fetch,
//!   reconciliation and deferred replay.
//! - **Uncertain mode** — a time-bounded window after repeated snapshot
//!   failures in which new BUY exposure is forbidden (sells stay allowed).
//! - **Stale-state reset** — day rollover or a long heartbeat gap wipes
//!   in-flight state; the venue snapshot rebuilds what is still real.
//!
//! # Threading
//!
//! Strategy threads, adapter callback threads and heartbeat timers may all
//! call in concurrently. A single ledger lock serializes state mutation;
//! venue I/O never runs under it (the one exception being `submit_order`,
//! held under the lock so a submission and its reservation are atomic).
//!
//! ```text
//! strategy ──intents──► LiveBroker ──fetch/submit──► BrokerAdapter
//!     ▲                  │   ▲                            │
//!     └──StrategyBridge──┘   └────on_order_status─────────┘
//! ```

mod bridge;
mod broker;
mod callback;
mod config;
mod heal;
mod intent;
mod reconcile;
mod state;

pub use bridge::{NoStrategy, StrategyBridge};
pub use broker::LiveBroker;
pub use config::CoreConfig;
