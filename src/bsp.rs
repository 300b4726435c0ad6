// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Read-only view of a compiled level, as handed over by the BSP loader.

use glam::{
    DAffine3,
    DQuat,
    DVec2,
    DVec3,
    EulerRot,
};

use crate::shader::ShaderKey;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BspPlane {
    pub normal: DVec3,
    pub dist:   f64,
}

impl BspPlane {
    pub const fn new(
        normal: DVec3,
        dist: f64,
    ) -> Self {
        Self { normal, dist }
    }
}

/// A child reference of a compiled node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BspChild {
    Node(usize),
    Leaf(usize),
}

impl BspChild {
    /// Decodes the on-disk convention where negative numbers are `-(leaf + 1)`.
    #[allow(clippy::cast_sign_loss)]
    pub const fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            Self::Leaf((-1 - raw) as usize)
        } else {
            Self::Node(raw as usize)
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BspNode {
    pub plane_num: usize,
    pub children:  [i32; 2], // negative numbers are leafs
}

impl BspNode {
    pub const fn child(
        &self,
        side: usize,
    ) -> BspChild {
        BspChild::from_raw(self.children[side])
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BspLeaf {
    /// `-1` for leafs inside solid space.
    pub cluster: i32,
}

impl BspLeaf {
    pub const fn is_solid(&self) -> bool {
        self.cluster == -1
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DrawVert {
    pub xyz: DVec3,
    pub st:  DVec2,
}

impl DrawVert {
    pub const fn new(
        xyz: DVec3,
        st: DVec2,
    ) -> Self {
        Self { xyz, st }
    }

    /// Midpoint of two verts, position and texture coordinate alike.
    pub fn lerp_half(
        &self,
        other: &Self,
    ) -> Self {
        Self {
            xyz: (self.xyz + other.xyz) * 0.5,
            st:  (self.st + other.st) * 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceType {
    Planar,
    TriangleSoup,
    Patch,
    Flare,
}

#[derive(Clone, Debug)]
pub struct DrawSurface {
    pub surface_type: SurfaceType,
    pub shader:       ShaderKey,

    pub first_vert:  usize,
    pub num_verts:   usize,
    pub first_index: usize,
    pub num_indexes: usize,

    pub patch_width:  usize,
    pub patch_height: usize,
    /// Per-surface patch subdivision override.
    pub patch_iterations: Option<u32>,

    /// Shadow cast group. Zero never casts.
    pub cast_shadows: i32,
    /// Leave out of the light grid pass.
    pub skip_grid:    bool,
    /// Surface was remapped from a portal-sky entity and belongs to the skybox tree.
    pub sky_portal:   bool,
}

impl DrawSurface {
    /// A triangle surface with worldspawn shadow defaults.
    pub const fn triangles(
        surface_type: SurfaceType,
        shader: ShaderKey,
        first_vert: usize,
        num_verts: usize,
        first_index: usize,
        num_indexes: usize,
    ) -> Self {
        Self {
            surface_type,
            shader,
            first_vert,
            num_verts,
            first_index,
            num_indexes,
            patch_width: 0,
            patch_height: 0,
            patch_iterations: None,
            cast_shadows: 1,
            skip_grid: false,
            sky_portal: false,
        }
    }

    /// A patch control grid with worldspawn shadow defaults. Patches skip the grid pass.
    pub const fn patch(
        shader: ShaderKey,
        first_vert: usize,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            surface_type: SurfaceType::Patch,
            shader,
            first_vert,
            num_verts: width * height,
            first_index: 0,
            num_indexes: 0,
            patch_width: width,
            patch_height: height,
            patch_iterations: None,
            cast_shadows: 1,
            skip_grid: true,
            sky_portal: false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BspModel {
    pub first_surface: usize,
    pub num_surfaces:  usize,
}

#[derive(Clone, Debug, Default)]
pub struct Entity {
    pairs: Vec<(String, String)>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(
        mut self,
        key: &str,
        value: &str,
    ) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(
        &mut self,
        key: &str,
        value: &str,
    ) {
        if let Some(pair) = self.pairs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            pair.1 = value.to_owned();
        } else {
            self.pairs.push((key.to_owned(), value.to_owned()));
        }
    }

    /// Missing keys read as the empty string.
    pub fn value_for_key(
        &self,
        key: &str,
    ) -> &str {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map_or("", |(_, v)| v.as_str())
    }

    pub fn float_for_key(
        &self,
        key: &str,
    ) -> f64 {
        self.value_for_key(key).trim().parse().unwrap_or(0.0)
    }

    pub fn int_for_key(
        &self,
        key: &str,
    ) -> i32 {
        leading_int(self.value_for_key(key))
    }

    /// Parses up to three whitespace separated floats, missing components are zero.
    pub fn vector_for_key(
        &self,
        key: &str,
    ) -> Option<DVec3> {
        let value = self.value_for_key(key);
        if value.trim().is_empty() {
            return None;
        }
        let mut out = [0.0; 3];
        for (slot, word) in out.iter_mut().zip(value.split_whitespace()) {
            *slot = word.parse().unwrap_or(0.0);
        }
        Some(DVec3::from_array(out))
    }

    /// Reads `_castShadows`/`_cs` and `_receiveShadows`/`_rs`, falling back to the defaults.
    pub fn shadow_flags(
        &self,
        default_cast: i32,
        default_recv: i32,
    ) -> (i32, i32) {
        let pick = |long: &str, short: &str, default: i32| {
            let value = match self.value_for_key(long) {
                "" => self.value_for_key(short),
                value => value,
            };
            if value.is_empty() {
                default
            } else {
                leading_int(value)
            }
        };
        (
            pick("_castShadows", "_cs", default_cast),
            pick("_receiveShadows", "_rs", default_recv),
        )
    }

    /// Instance transform from `origin`, `angle`/`angles` and `modelscale`/`modelscale_vec`.
    pub fn transform(&self) -> DAffine3 {
        let origin = self.vector_for_key("origin").unwrap_or(DVec3::ZERO);

        let mut scale = DVec3::ONE;
        let uniform = self.float_for_key("modelscale");
        if uniform != 0.0 {
            scale = DVec3::splat(uniform);
        }
        if let Some(v) = self.vector_for_key("modelscale_vec") {
            scale = v;
        }

        // angles are "pitch yaw roll"
        let mut pitch = 0.0;
        let mut yaw = self.float_for_key("angle");
        let mut roll = 0.0;
        if let Some(v) = self.vector_for_key("angles") {
            (pitch, yaw, roll) = (v.x, v.y, v.z);
        }

        let rotation = DQuat::from_euler(
            EulerRot::ZYX,
            yaw.to_radians(),
            pitch.to_radians(),
            roll.to_radians(),
        );
        DAffine3::from_scale_rotation_translation(scale, rotation, origin)
    }
}

/// `atoi` semantics: optional sign then leading digits, anything else reads as zero.
fn leading_int(value: &str) -> i32 {
    let value = value.trim_start();
    let (sign, digits) = match value.as_bytes().first() {
        Some(b'-') => (-1, &value[1..]),
        Some(b'+') => (1, &value[1..]),
        _ => (1, value),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i32>().map_or(0, |v| sign * v)
}

/// Everything the trace tree reads from a compiled level.
#[derive(Clone, Debug, Default)]
pub struct BspLevel {
    pub planes:   Vec<BspPlane>,
    pub nodes:    Vec<BspNode>,
    pub leafs:    Vec<BspLeaf>,
    pub models:   Vec<BspModel>,
    pub surfaces: Vec<DrawSurface>,
    pub verts:    Vec<DrawVert>,
    pub indexes:  Vec<u32>,
    /// Entity 0 is worldspawn.
    pub entities: Vec<Entity>,
}

impl BspLevel {
    /// Appends a triangle surface built from `verts`/`indexes` and returns its surface number.
    pub fn push_triangles(
        &mut self,
        surface_type: SurfaceType,
        shader: ShaderKey,
        verts: &[DrawVert],
        indexes: &[u32],
    ) -> usize {
        let surface = DrawSurface::triangles(
            surface_type,
            shader,
            self.verts.len(),
            verts.len(),
            self.indexes.len(),
            indexes.len(),
        );
        self.verts.extend_from_slice(verts);
        self.indexes.extend_from_slice(indexes);
        self.surfaces.push(surface);
        self.surfaces.len() - 1
    }

    /// Appends a patch control grid, row-major, and returns its surface number.
    pub fn push_patch(
        &mut self,
        shader: ShaderKey,
        width: usize,
        height: usize,
        control: &[DrawVert],
    ) -> usize {
        let surface = DrawSurface::patch(shader, self.verts.len(), width, height);
        self.verts.extend_from_slice(control);
        self.surfaces.push(surface);
        self.surfaces.len() - 1
    }

    pub fn surface_verts(
        &self,
        surface: &DrawSurface,
    ) -> Option<&[DrawVert]> {
        self.verts
            .get(surface.first_vert..surface.first_vert.checked_add(surface.num_verts)?)
    }

    pub fn surface_indexes(
        &self,
        surface: &DrawSurface,
    ) -> Option<&[u32]> {
        self.indexes
            .get(surface.first_index..surface.first_index.checked_add(surface.num_indexes)?)
    }
}
