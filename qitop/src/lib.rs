//! # qitop - Live Monitor for Remote Object Services
//!
//! qitop watches the services registered on a remote object bus, ranks
//! their methods by call count and latency, and traces the calls of one
//! selected method by pairing the call and response events the bus emits.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Remote Object Bus (trait Bus)                   │
//! │  directory · meta-objects · statistics · trace subscriptions    │
//! └───────┬──────────────────────┬───────────────────────┬──────────┘
//!         │ add/remove           │ statistics            │ trace events
//!         ▼                      ▼                       ▼
//! ┌──────────────┐      ┌────────────────┐      ┌─────────────────┐
//! │   Service    │─────▶│  UsageRanker   │      │ TraceCorrelator │
//! │   Registry   │ list │ (poll task)    │      │ (one per slot)  │
//! └──────────────┘      └───────┬────────┘      └───┬─────────┬───┘
//!                               │ ranking           │ series  │ CallRecords
//!                               ▼                   ▼         ▼
//!                      ┌──────────────────────────────────────────┐
//!                      │      Monitor (session orchestration)     │
//!                      └──────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                      report (stdout) · export (JSON)
//! ```
//!
//! ## Module Structure
//!
//! - [`bus`]: capability trait consumed from the bus, and the in-memory bus
//! - [`registry`]: live set of services and their method maps
//! - [`analysis`]: usage ranking over polled statistics
//! - [`correlation`]: call/response pairing and plotted series
//! - [`retention`]: bounded sample buffers behind every series
//! - [`monitor`]: session, configuration and task orchestration
//! - [`report`], [`export`]: headless output and JSON export
//! - [`demo`]: simulated services for `--demo`
//! - [`cli`], [`domain`]: arguments, newtypes and error types
//!
//! ## Key Concepts
//!
//! - **Action**: `service.method`, the unit of ranking
//! - **Slot**: method id a correlator filters trace events on
//! - **Ignored range**: bus-internal method ids (`0x50..=0x53`), never
//!   ranked nor traced

pub mod analysis;
pub mod bus;
pub mod cli;
pub mod correlation;
pub mod demo;
pub mod domain;
pub mod export;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod retention;
