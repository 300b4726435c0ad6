// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use arrayvec::ArrayVec;
use glam::DVec3;

use crate::{
    config::MAX_TRACE_TEST_NODES,
    shader::CompileFlags,
};

/// One occlusion query, filled in by the caller and completed by `TraceTree::trace_line`.
///
/// Lives on the caller's stack. The candidate list is inline so a query never allocates.
#[derive(Clone, Debug)]
pub struct Trace<'a> {
    pub origin:         DVec3,
    pub end:            DVec3,
    /// Hits closer to the origin than this are ignored.
    pub inhibit_radius: f64,
    /// Surfaces the query is being traced from, excluded from grazing self-shadowing.
    pub surfaces:       &'a [i32],
    /// Shadow group of the receiver. Zero receives nothing.
    pub recv_shadows:   i32,
    pub test_occlusion: bool,
    /// Keep testing past the first opaque hit so every touched surface reports its flags.
    pub test_all:       bool,
    pub test_sky:       bool,
    /// Query comes from the light grid pass.
    pub in_grid:        bool,

    pub displacement: DVec3,
    pub direction:    DVec3,
    pub distance:     f64,

    pub hit:                DVec3,
    pub pass_solid:         bool,
    pub opaque:             bool,
    /// Light surviving the filtered surfaces crossed so far.
    pub color:              DVec3,
    pub compile_flags:      CompileFlags,
    pub force_sub_sampling: f64,

    pub(crate) test_nodes: ArrayVec<u32, MAX_TRACE_TEST_NODES>,
}

impl<'a> Trace<'a> {
    /// A world-group query between two points that stops at the first opaque hit.
    pub fn new(
        origin: DVec3,
        end: DVec3,
    ) -> Self {
        Self {
            origin,
            end,
            inhibit_radius: 0.0,
            surfaces: &[],
            recv_shadows: 1,
            test_occlusion: true,
            test_all: false,
            test_sky: false,
            in_grid: false,

            displacement: DVec3::ZERO,
            direction: DVec3::ZERO,
            distance: 0.0,

            hit: origin,
            pass_solid: false,
            opaque: false,
            color: DVec3::ONE,
            compile_flags: CompileFlags::empty(),
            force_sub_sampling: 0.0,

            test_nodes: ArrayVec::new(),
        }
    }

    #[must_use]
    pub fn with_surfaces(
        mut self,
        surfaces: &'a [i32],
    ) -> Self {
        self.surfaces = surfaces;
        self
    }

    #[must_use]
    pub fn with_recv_shadows(
        mut self,
        recv_shadows: i32,
    ) -> Self {
        self.recv_shadows = recv_shadows;
        self
    }

    #[must_use]
    pub fn with_inhibit_radius(
        mut self,
        inhibit_radius: f64,
    ) -> Self {
        self.inhibit_radius = inhibit_radius;
        self
    }

    /// Derives direction and distance from the endpoints and resets the results.
    pub fn setup(&mut self) -> f64 {
        self.displacement = self.end - self.origin;
        self.distance = self.displacement.length();
        self.direction = self.displacement.normalize_or_zero();
        self.reset();
        self.distance
    }

    pub(crate) fn reset(&mut self) {
        self.hit = self.origin;
        self.pass_solid = false;
        self.opaque = false;
        self.color = DVec3::ONE;
        self.compile_flags = CompileFlags::empty();
        self.force_sub_sampling = 0.0;
        self.test_nodes.clear();
    }

    /// Leaves collected by the last traversal.
    pub fn test_nodes(&self) -> &[u32] {
        &self.test_nodes
    }
}
