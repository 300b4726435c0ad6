// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::{
    DAffine3,
    DVec2,
    DVec3,
};
use tracing::{
    debug,
    warn,
};

use super::{
    build::TreeBuilder,
    pool::TraceInfo,
    winding::{
        TraceVert,
        TraceWinding,
    },
};
use crate::{
    bsp::{
        BspLevel,
        BspModel,
        DrawSurface,
        SurfaceType,
    },
    error::TraceError,
    model::ModelWalker,
    patch::Mesh,
    scene::SceneAssets,
    shader::CompileFlags,
};

#[derive(Debug, Default)]
struct Skipped {
    no_cast:        usize,
    patch:          usize,
    missing_shader: usize,
    nodraw:         usize,
    translucent:    usize,
    flare:          usize,
}

fn overflow(
    surface: usize,
    reason: &str,
) -> TraceError {
    TraceError::TriangleBufferOverflow {
        surface: i32::try_from(surface).unwrap_or(i32::MAX),
        reason:  reason.to_owned(),
    }
}

impl TreeBuilder<'_> {
    /// Filters the world, every shadow casting entity model and every external model
    /// instance into the trees.
    pub fn populate(
        &mut self,
        level: &BspLevel,
        assets: &SceneAssets,
    ) -> Result<(), TraceError> {
        let mut skipped = Skipped::default();

        if let Some(world) = level.models.first() {
            self.infos.begin_model();
            self.populate_bsp_model(level, assets, world, &DAffine3::IDENTITY, None, &mut skipped)?;
        }

        for (index, entity) in level.entities.iter().enumerate().skip(1) {
            let (cast_shadows, _) = entity.shadow_flags(0, 1);
            if cast_shadows == 0 {
                continue;
            }
            let transform = entity.transform();

            for key in ["model", "model2"] {
                let value = entity.value_for_key(key);
                if value.is_empty() {
                    continue;
                }
                self.infos.begin_model();

                if let Some(num) = value.strip_prefix('*') {
                    let model = num
                        .parse::<usize>()
                        .ok()
                        .filter(|&n| n >= 1)
                        .and_then(|n| level.models.get(n));
                    let Some(model) = model else {
                        warn!(entity = index, model = value, "bad submodel reference");
                        continue;
                    };
                    debug!(entity = index, model = value, cast_shadows, "adding submodel");
                    self.populate_bsp_model(
                        level,
                        assets,
                        model,
                        &transform,
                        Some(cast_shadows),
                        &mut skipped,
                    )?;
                } else {
                    let Some(surfaces) = assets.model(value) else {
                        warn!(entity = index, model = value, "unknown model");
                        continue;
                    };
                    debug!(entity = index, model = value, cast_shadows, "adding model");
                    for surface in surfaces {
                        self.populate_external(
                            assets,
                            surface.as_ref(),
                            &transform,
                            cast_shadows,
                            &mut skipped,
                        )?;
                    }
                }
            }
        }

        debug!(?skipped, "skipped surfaces");
        Ok(())
    }

    fn populate_bsp_model(
        &mut self,
        level: &BspLevel,
        assets: &SceneAssets,
        model: &BspModel,
        transform: &DAffine3,
        cast_override: Option<i32>,
        skipped: &mut Skipped,
    ) -> Result<(), TraceError> {
        for surface_num in model.first_surface..model.first_surface + model.num_surfaces {
            let surface = level
                .surfaces
                .get(surface_num)
                .ok_or_else(|| overflow(surface_num, "model surface range exceeds the level"))?;

            let cast_shadows = cast_override.unwrap_or(surface.cast_shadows);
            if surface.cast_shadows == 0 || cast_shadows == 0 {
                skipped.no_cast += 1;
                continue;
            }
            if surface.surface_type == SurfaceType::Patch && !self.config().patch_shadows {
                skipped.patch += 1;
                continue;
            }
            let Some(shader) = assets.shader(surface.shader) else {
                skipped.missing_shader += 1;
                continue;
            };
            if shader.content_flags & self.config().nodraw_content_flags != 0
                || shader.surface_flags & self.config().nodraw_surface_flags != 0
                || shader.compile_flags.contains(CompileFlags::NODRAW)
            {
                skipped.nodraw += 1;
                continue;
            }
            if !shader.casts_shadows() {
                skipped.translucent += 1;
                continue;
            }
            if surface.surface_type == SurfaceType::Flare {
                skipped.flare += 1;
                continue;
            }

            let info = self.infos.intern(TraceInfo {
                shader:        surface.shader,
                compile_flags: shader.compile_flags,
                light_image:   shader.light_image,
                surface_num:   i32::try_from(surface_num).unwrap_or(i32::MAX),
                cast_shadows,
                skip_grid:     surface.skip_grid,
            })?;
            let target = if surface.sky_portal { self.skybox() } else { self.head() };

            match surface.surface_type {
                SurfaceType::Patch => {
                    self.populate_patch(level, surface, surface_num, info, transform, target)?;
                },
                SurfaceType::Planar | SurfaceType::TriangleSoup | SurfaceType::Flare => {
                    let verts = level
                        .surface_verts(surface)
                        .ok_or_else(|| overflow(surface_num, "vertex range exceeds the level"))?;
                    let indexes = level
                        .surface_indexes(surface)
                        .ok_or_else(|| overflow(surface_num, "index range exceeds the level"))?;
                    if indexes.len() % 3 != 0 {
                        return Err(overflow(surface_num, "index count is not a multiple of 3"));
                    }

                    for tri in indexes.chunks_exact(3) {
                        let mut xyz = [DVec3::ZERO; 3];
                        let mut st = [DVec2::ZERO; 3];
                        for k in 0..3 {
                            let vert = verts
                                .get(tri[k] as usize)
                                .ok_or_else(|| overflow(surface_num, "index out of range"))?;
                            xyz[k] = vert.xyz;
                            st[k] = vert.st;
                        }
                        self.insert_triangle(info, xyz, st, transform, target)?;
                    }
                },
            }
        }
        Ok(())
    }

    fn populate_patch(
        &mut self,
        level: &BspLevel,
        surface: &DrawSurface,
        surface_num: usize,
        info: u32,
        transform: &DAffine3,
        target: u32,
    ) -> Result<(), TraceError> {
        let control = level
            .surface_verts(surface)
            .ok_or_else(|| overflow(surface_num, "vertex range exceeds the level"))?;
        let mesh = Mesh::new(surface.patch_width, surface.patch_height, control.to_vec())
            .ok_or_else(|| overflow(surface_num, "patch control grid does not match its size"))?;

        let iterations = surface
            .patch_iterations
            .unwrap_or(self.config().default_patch_iterations);
        let mut mesh = mesh.subdivide(iterations);
        mesh.put_on_curve();
        let mesh = mesh.remove_linear_columns_rows();

        for [a, b, c] in mesh.triangles() {
            self.insert_triangle(info, [a.xyz, b.xyz, c.xyz], [a.st, b.st, c.st], transform, target)?;
        }
        Ok(())
    }

    fn populate_external(
        &mut self,
        assets: &SceneAssets,
        surface: &dyn ModelWalker,
        transform: &DAffine3,
        cast_shadows: i32,
        skipped: &mut Skipped,
    ) -> Result<(), TraceError> {
        let Some(key) = assets.shaders.find(surface.shader_name()) else {
            skipped.missing_shader += 1;
            return Ok(());
        };
        let Some(shader) = assets.shader(key) else {
            skipped.missing_shader += 1;
            return Ok(());
        };
        if shader.compile_flags.contains(CompileFlags::NODRAW) {
            skipped.nodraw += 1;
            return Ok(());
        }
        if !shader.casts_shadows() {
            skipped.translucent += 1;
            return Ok(());
        }

        let info = self.infos.intern(TraceInfo {
            shader: key,
            compile_flags: shader.compile_flags,
            light_image: shader.light_image,
            surface_num: -1,
            cast_shadows,
            skip_grid: false,
        })?;

        let mut faces = Vec::new();
        surface.for_each_face(&mut |xyz, st| faces.push((xyz, st)));
        let head = self.head();
        for (xyz, st) in faces {
            self.insert_triangle(info, xyz, st, transform, head)?;
        }
        Ok(())
    }

    fn insert_triangle(
        &mut self,
        info: u32,
        xyz: [DVec3; 3],
        st: [DVec2; 3],
        transform: &DAffine3,
        target: u32,
    ) -> Result<usize, TraceError> {
        let verts = [0, 1, 2].map(|k| TraceVert::new(transform.transform_point3(xyz[k]), st[k]));
        self.filter_into_nodes(TraceWinding::triangle(info, verts), target)
    }
}
