// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::path::Path;

use glam::{
    DVec2,
    DVec3,
};
use gltf::mesh::Mode;

use crate::error::TraceError;

/// One shader's worth of triangles from an external model.
pub trait ModelWalker {
    fn shader_name(&self) -> &str;

    /// Calls `visitor` with the positions and texture coordinates of every triangle.
    fn for_each_face(
        &self,
        visitor: &mut dyn FnMut([DVec3; 3], [DVec2; 3]),
    );
}

/// An indexed triangle list held in memory.
#[derive(Clone, Debug)]
pub struct TriangleMesh {
    shader:    String,
    positions: Vec<DVec3>,
    st:        Vec<DVec2>,
    indices:   Vec<u32>,
}

impl TriangleMesh {
    /// Returns `None` if the texcoords do not match the positions, the index count is not a
    /// multiple of three, or an index is out of range.
    pub fn new(
        shader: impl Into<String>,
        positions: Vec<DVec3>,
        st: Vec<DVec2>,
        indices: Vec<u32>,
    ) -> Option<Self> {
        let valid = st.len() == positions.len()
            && indices.len() % 3 == 0
            && indices.iter().all(|&i| (i as usize) < positions.len());
        valid.then(|| Self {
            shader: shader.into(),
            positions,
            st,
            indices,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

impl ModelWalker for TriangleMesh {
    fn shader_name(&self) -> &str {
        &self.shader
    }

    fn for_each_face(
        &self,
        visitor: &mut dyn FnMut([DVec3; 3], [DVec2; 3]),
    ) {
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| i as usize);
            visitor(
                [self.positions[a], self.positions[b], self.positions[c]],
                [self.st[a], self.st[b], self.st[c]],
            );
        }
    }
}

/// Triangle primitives of a glTF file, one surface per primitive.
#[derive(Clone, Debug, Default)]
pub struct GltfModel {
    surfaces: Vec<TriangleMesh>,
}

impl GltfModel {
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let (document, buffers, _) = gltf::import(path.as_ref())?;

        let mut surfaces = Vec::new();
        for mesh in document.meshes() {
            for prim in mesh.primitives() {
                if prim.mode() != Mode::Triangles {
                    continue;
                }

                let reader = prim.reader(|buf| buffers.get(buf.index()).map(|d| &*d.0));
                let Some(positions) = reader.read_positions() else {
                    tracing::warn!(mesh = mesh.index(), "no positions attached to triangle mesh");
                    continue;
                };
                let positions: Vec<DVec3> = positions
                    .map(|p| DVec3::from_array(p.map(f64::from)))
                    .collect();

                let st: Vec<DVec2> = match reader.read_tex_coords(0) {
                    Some(coords) => coords
                        .into_f32()
                        .map(|st| DVec2::from_array(st.map(f64::from)))
                        .collect(),
                    None => vec![DVec2::ZERO; positions.len()],
                };

                let indices: Vec<u32> = match reader.read_indices() {
                    Some(indices) => indices.into_u32().collect(),
                    None => (0..u32::try_from(positions.len()).unwrap_or(u32::MAX)).collect(),
                };

                let shader = prim.material().name().unwrap_or("noshader").to_owned();
                let Some(surface) = TriangleMesh::new(shader, positions, st, indices) else {
                    tracing::warn!(mesh = mesh.index(), "malformed triangle primitive");
                    continue;
                };
                tracing::debug!(
                    mesh = mesh.index(),
                    shader = surface.shader_name(),
                    tris = surface.triangle_count(),
                    "added model surface"
                );
                surfaces.push(surface);
            }
        }

        Ok(Self { surfaces })
    }

    pub fn surfaces(&self) -> &[TriangleMesh] {
        &self.surfaces
    }

    pub fn into_surfaces(self) -> Vec<TriangleMesh> {
        self.surfaces
    }
}
