// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Storage backends that need the filesystem.

pub mod file;

pub use file::FileStorage;
