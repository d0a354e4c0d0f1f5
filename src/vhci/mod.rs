//! # Virtual Host Controller Core
//!
//! This module implements the core of a virtual USB host controller:
//! a fake root hub with a configurable number of ports whose actual
//! bus and device behavior is emulated by a cooperating backend.
//!
//! The two sides meet in a narrow synchronous protocol. The host-side
//! stack registers controllers and submits transfers through the
//! [`registry::Registry`]; the backend drains the per-controller
//! [`queue::WorkQueue`], fetches transfer data, posts port changes and
//! completes transfers with givebacks. The [`wire`] module provides
//! the byte-exact frame encodings for carrying the protocol over a
//! byte-oriented channel, including the 32-bit compatibility variant.
//!
//! It should never depend on a specific transport or on a real USB
//! subsystem's device model.

#![deny(missing_docs)]
#![deny(rustdoc::all)]
#![deny(clippy::must_use_candidate)]
#![deny(missing_debug_implementations)]

pub mod arena;
pub mod constants;
pub mod controller;
pub mod error;
pub mod port;
pub mod queue;
pub mod registry;
pub mod transfer;
pub mod wire;
