//! Shared utilities for the SONiC transceiver daemon.
//!
//! This crate holds the pieces of `xcvrd` that do not know anything about
//! optics but that every hardware-facing manager needs:
//!
//! - [`fan_out`]: Fixed fan-out/fan-in join with a per-unit bounded wait
//! - [`TaskOutcome`]: Per-unit result of a fan-out (done, failed, timed out)
//! - [`SlotMap`]: Map over a fixed universe of slots that never auto-creates
//! - [`PeriodicService`]: Trait for work driven by a periodic timer
//!
//! # Fault isolation
//!
//! A fan-out never fails as a whole. Each unit reports its own
//! [`TaskOutcome`], and the caller decides what a failed unit means:
//!
//! ```
//! use std::time::Duration;
//! use sonic_xcvr_common::{fan_out, TaskOutcome};
//!
//! # tokio_test_rt(async {
//! let results = fan_out(vec![1, 2, 3], Duration::from_millis(50), |id| async move {
//!     if id == 2 { Err(format!("unit {id} failed")) } else { Ok(id * 10) }
//! })
//! .await;
//!
//! assert_eq!(results[&1], TaskOutcome::Done(10));
//! assert!(results[&2].is_failed());
//! assert_eq!(results[&3], TaskOutcome::Done(30));
//! # });
//! # fn tokio_test_rt<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f);
//! # }
//! ```

mod fanout;
mod outcome;
mod service;
mod slot_map;

pub use fanout::fan_out;
pub use outcome::TaskOutcome;
pub use service::{run_periodic, PeriodicService};
pub use slot_map::{SlotMap, SlotMapError};
