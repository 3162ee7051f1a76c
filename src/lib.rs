//! Traffic Survey - timed roadside vehicle counts with AI-assisted analysis.
//!
//! # Overview
//!
//! A surveyor declares a duration, starts a countdown, and taps counters for
//! two-wheelers, three-wheelers, four-wheelers and heavy vehicles. When the
//! countdown ends (or the surveyor finishes early) they describe the road
//! conditions. The completed record joins the session history and is sent to a
//! generative insight service for a conclusion, precautions and suggestions.
//! The latest analysis can be exported as a report.
//!
//! The survey lifecycle is a pure state machine ([`controller`]) driven by a
//! single session task ([`session`]) that owns the countdown ticker and the
//! outstanding insight request.
//!
//! # Modules
//!
//! - [`model`]: Survey records, vehicle categories and observation enums
//! - [`tally`]: Vehicle counters and distribution
//! - [`timer`]: Countdown state and the one-second ticker
//! - [`form`]: Details submission and validation
//! - [`insight`]: Generative insight service client
//! - [`controller`]: Survey lifecycle state machine
//! - [`session`]: Session task and its handle
//! - [`report`]: Chart, Markdown and CSV export
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment configuration

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod form;
pub mod insight;
pub mod model;
pub mod report;
pub mod session;
pub mod tally;
pub mod timer;
