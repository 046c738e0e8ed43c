//! # Loop Safety Guards
//!
//! The safety guard layer of an automated insulin delivery application. Three
//! independent guards sit between command sources and actuation, each
//! enforcing a single safety invariant:
//!
//! - **Remote command validation**: bolus, carb and override commands from
//!   remote senders become validated actions or typed rejections
//! - **Delivery uncertainty alerting**: the user is never left without a
//!   visible warning while the pump cannot confirm delivery
//! - **Trusted time monitoring**: device clock drift against an external
//!   reference raises an alert and is persisted across restarts
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use loopguard::remote::{BolusCommand, RemoteCommand, ValidatedAction};
//! use loopguard::rules::ValidationRules;
//!
//! let rules = ValidationRules::default().with_maximum_bolus(5.0);
//! let command = RemoteCommand::Bolus(BolusCommand::new(3.0));
//!
//! match command.validate(&rules, Utc::now()) {
//!     Ok(ValidatedAction::BolusDeliveryRequest { amount }) => assert_eq!(amount, 3.0),
//!     other => panic!("unexpected result: {other:?}"),
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`rules`] - Validation limits and their defaults
//! - [`remote`] - Remote command validators
//! - [`alert`] - Alert model and the issuing port
//! - [`delivery`] - Delivery uncertainty alert state machine
//! - [`trusted_time`] - Reference time fetching and drift monitoring
//! - [`config`] - JSON configuration

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod alert;
pub mod config;
pub mod delivery;
pub mod remote;
pub mod rules;
pub mod trusted_time;

pub use alert::{Alert, AlertIdentifier, AlertIssuer};
pub use config::GuardConfig;
pub use delivery::DeliveryUncertaintyAlertManager;
pub use remote::{RemoteCommand, RemoteCommandError, ValidatedAction};
pub use rules::ValidationRules;
pub use trusted_time::TrustedTimeMonitor;
