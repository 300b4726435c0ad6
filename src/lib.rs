// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Shadow ray visibility for lightmap baking.
//!
//! A [`TraceTree`] is built once from a compiled level ([`bsp::BspLevel`]) and the shaders,
//! light images and external models it references ([`SceneAssets`]). After that it is
//! read-only and answers "is anything between these two points" queries through
//! [`TraceTree::trace_line`], attenuating light through alpha-shadow and light-filter
//! surfaces on the way.
//!
//! ```no_run
//! use glam::DVec3;
//! use shadow_trace::{bsp::BspLevel, SceneAssets, Trace, TraceConfig, TraceTree};
//!
//! # fn main() -> Result<(), shadow_trace::TraceError> {
//! let level = BspLevel::default();
//! let assets = SceneAssets::new();
//! let tree = TraceTree::build(&level, &assets, &TraceConfig::default())?;
//!
//! let mut trace = Trace::new(DVec3::new(0.0, 0.0, 8.0), DVec3::new(0.0, 0.0, 512.0));
//! trace.setup();
//! tree.trace_line(&mut trace);
//! assert!(!trace.opaque);
//! # Ok(())
//! # }
//! ```

pub mod bsp;
pub mod config;
pub mod error;
pub mod model;
pub mod patch;
pub mod scene;
pub mod shader;
pub mod trace;

pub use config::TraceConfig;
pub use error::TraceError;
pub use scene::SceneAssets;
pub use trace::{
    BuildStats,
    Trace,
    TraceTree,
};
