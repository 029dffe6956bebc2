//! Drill Gauntlet · encounter-driven language drill engine
//!
//! The core (rating, encounter selection, encounter state machine, fuse
//! timer, roulette, session reducer) is pure and deterministic given an RNG.
//! `orchestrator` drives it over time and IO; `routes` exposes it over
//! HTTP + WebSocket.

pub mod config;
pub mod domain;
pub mod encounter;
pub mod error;
pub mod fuse;
pub mod logic;
pub mod openai;
pub mod orchestrator;
pub mod protocol;
pub mod rating;
pub mod roulette;
pub mod routes;
pub mod seeds;
pub mod selector;
pub mod services;
pub mod session;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;
