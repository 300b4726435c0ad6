// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Build knobs and the tuned tolerances used by the trace tree.
//!
//! The epsilons below were tuned against real lightmap output. They are kept as
//! literal values; changing any of them shifts where shadows land.

/// Distance from a splitting plane within which a traced segment counts as touching both sides.
pub const TRACE_ON_EPSILON: f64 = 0.1;

/// Distance from a clip plane within which a winding vertex is kept on both sides.
pub const WINDING_ON_EPSILON: f64 = 0.25;

/// Determinant magnitude under which a ray is treated as parallel to a triangle.
pub const COPLANAR_EPSILON: f64 = 0.25;

/// Barycentric slack past the triangle edges, closes seams between neighbours.
pub const BARY_EPSILON: f64 = 0.01;

/// Tighter barycentric bound for texture-filtered surfaces.
pub const ASLF_EPSILON: f64 = 0.0001;

/// Hits closer than this to the origin are checked against the querying surfaces.
pub const SELF_SHADOW_EPSILON: f64 = 0.5;

/// Normal dot product above which a winding plane is considered to match a node plane.
pub const PLANE_MATCH_DOT: f64 = 0.999;

/// Distance delta below which a winding plane is considered to match a node plane.
pub const PLANE_MATCH_DIST: f64 = 0.001;

/// Filter colour at or below which every channel counts as black.
pub const FILTER_OPAQUE_EPSILON: f64 = 0.001;

pub const MAX_TW_VERTS: usize = 24;
pub const MAX_TRACE_TEST_NODES: usize = 256;
pub const GROW_NODE_ITEMS: usize = 16;
pub const MAX_EXPANDED_AXIS: usize = 128;

#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// Insert curved patches as shadow casters.
    pub patch_shadows: bool,
    /// Skip adaptive subdivision and keep the compiled partition as-is.
    pub low_memory: bool,
    pub default_patch_iterations: u32,

    pub nodraw_content_flags: u32,
    pub nodraw_surface_flags: u32,

    pub max_trace_depth:    u32,
    pub max_node_triangles: usize,
    pub min_node_size:      f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            patch_shadows:            false,
            low_memory:               false,
            default_patch_iterations: 4,

            nodraw_content_flags: 0,
            // SURF_NODRAW
            nodraw_surface_flags: 0x80,

            max_trace_depth:    32,
            max_node_triangles: 5,
            min_node_size:      32.0,
        }
    }
}
