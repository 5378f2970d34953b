// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Curator: local PLR content scanner, classifier and library organizer
//!
//! Walks user-selected folders, batches the discovered files through a local
//! Ollama classifier, and copies or moves the detected PLR packages into a
//! niche-keyed library while keeping scan history, profiles and a catalog.

pub mod batcher;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod ollama;
pub mod options;
pub mod organize;
pub mod profiles;
pub mod scan;
pub mod session;
pub mod store;
pub mod tree;
pub mod walker;
pub mod web;

pub use config::AppConfig;
pub use error::{ClassifierError, CuratorError, Result};
