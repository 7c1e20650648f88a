// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # insight-governance-std
//!
//! Filesystem-backed storage for `insight-governance-core`.
//!
//! This crate provides [`FileStorage`], a JSON file-backed implementation of
//! the [`InsightStore`] trait for dashboards and local tools that want cache,
//! budget, audit and flag state to survive restarts.
//!
//! [`InsightStore`]: insight_governance_core::InsightStore
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use insight_governance_core::{InsightStore, SharedStorage};
//! use insight_governance_std::storage::FileStorage;
//!
//! let storage = FileStorage::open("/var/lib/insight/governance.json")
//!     .expect("failed to open storage file");
//! let shared = SharedStorage::new(storage);
//!
//! // Pick up writes made by another process.
//! shared.with(|store| store.reload()).expect("reload failed");
//! assert!(shared.runtime_enabled().unwrap_or(true));
//! ```

pub mod storage;

pub use storage::file::FileStorage;
