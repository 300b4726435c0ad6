// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use thiserror::Error;

/// Failures while building the trace tree or loading the assets it samples.
///
/// Everything here aborts the build. Query time never fails.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("MAX_TW_VERTS ({limit}) exceeded while clipping a trace winding")]
    WindingOverflow { limit: usize },

    #[error("triangle buffer overflow on surface {surface}: {reason}")]
    TriangleBufferOverflow { surface: i32, reason: String },

    #[error("invalid trace node {node}")]
    InvalidNode { node: i32 },

    #[error("{pool} pool exhausted the handle space")]
    PoolExhausted { pool: &'static str },

    #[error("failed to read asset")]
    Io(#[from] std::io::Error),

    #[error("failed to decode image")]
    Image(#[from] png::DecodingError),

    #[error("unsupported image layout {0:?}")]
    ImageFormat(png::ColorType),

    #[error("failed to import model")]
    Gltf(#[from] gltf::Error),
}
