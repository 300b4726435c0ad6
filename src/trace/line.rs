// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::DVec3;

use super::{
    node::TraceNode,
    query::Trace,
    winding::TraceTriangle,
    TraceTree,
};
use crate::{
    config::{
        ASLF_EPSILON,
        BARY_EPSILON,
        COPLANAR_EPSILON,
        FILTER_OPAQUE_EPSILON,
        SELF_SHADOW_EPSILON,
        TRACE_ON_EPSILON,
    },
    shader::CompileFlags,
};

/// Segments shorter than this never hit anything.
const MIN_TRACE_DISTANCE: f64 = 1e-5;

/// Whether a receiver in group `recv_shadows` is shadowed by a caster in `cast_shadows`.
///
/// Group 1 is the world. A receiver in group 1 takes shadows from every positive group,
/// a receiver in a higher group takes them from the world and its own group, and a negative
/// receiver only from its own group.
pub fn accepts_shadow_group(
    recv_shadows: i32,
    cast_shadows: i32,
) -> bool {
    if recv_shadows == 1 {
        cast_shadows > 0
    } else if recv_shadows > 1 {
        cast_shadows == 1 || cast_shadows.abs() == recv_shadows.abs()
    } else {
        // Negative groups match their positive twin: -2 and 2 are the same group
        cast_shadows.abs() == recv_shadows.abs()
    }
}

/// Whether a filtered hit inside the `ASLF_EPSILON` band of an edge belongs to `tri`.
///
/// Of two triangles sharing an edge only the one whose far vertex lies on the positive side
/// of the edge, taken in lexicographic vertex order and seen along `direction`, keeps the
/// band. Hits near a corner must pass this for both edges.
fn owns_edge_hit(
    tri: &TraceTriangle,
    u: f64,
    v: f64,
    direction: DVec3,
) -> bool {
    let [a, b, c] = tri.v.map(|vert| vert.xyz);
    // (barycentric weight, edge, opposite vertex)
    let edges = [(1.0 - u - v, b, c, a), (u, a, c, b), (v, a, b, c)];
    edges
        .into_iter()
        .filter(|&(weight, ..)| weight.abs() <= ASLF_EPSILON)
        .all(|(_, p, q, opposite)| {
            let (p, q) = if lexically_less(q, p) { (q, p) } else { (p, q) };
            direction.dot((q - p).cross(opposite - p)) > 0.0
        })
}

fn lexically_less(
    a: DVec3,
    b: DVec3,
) -> bool {
    a.to_array().partial_cmp(&b.to_array()) == Some(std::cmp::Ordering::Less)
}

impl TraceTree<'_> {
    /// Runs an occlusion query prepared with [`Trace::setup`].
    ///
    /// Never fails. A query that cannot receive shadows or has no length comes back
    /// unoccluded.
    pub fn trace_line(
        &self,
        trace: &mut Trace<'_>,
    ) {
        trace.reset();
        if trace.recv_shadows == 0 || !trace.test_occlusion || trace.distance <= MIN_TRACE_DISTANCE
        {
            return;
        }

        self.trace_line_r(self.head, trace.origin, trace.end, trace);
        if trace.pass_solid && !trace.test_all {
            trace.opaque = true;
            trace.color = DVec3::ZERO;
            return;
        }

        let mut sky_traced = false;
        if trace.test_sky {
            self.trace_line_r(self.skybox, trace.origin, trace.end, trace);
            sky_traced = true;
        }
        if self.test_candidates(trace, 0) {
            return;
        }

        // Touching sky in exhaustive mode means the skybox behind it matters too
        if trace.test_all && !sky_traced && trace.compile_flags.contains(CompileFlags::SKY) {
            let first = trace.test_nodes.len();
            self.trace_line_r(self.skybox, trace.origin, trace.end, trace);
            self.test_candidates(trace, first);
        }

        if trace.pass_solid {
            trace.opaque = true;
            trace.color = DVec3::ZERO;
        }
    }

    /// Walks the segment `start..end` down from `node`, collecting the non-empty leaves it
    /// crosses. Returns `true` once the query should stop.
    ///
    /// Only the near side of a split recurses, the far side continues in the loop, which
    /// keeps the stack as deep as the tree at most.
    pub(crate) fn trace_line_r(
        &self,
        mut node: u32,
        mut start: DVec3,
        end: DVec3,
        trace: &mut Trace<'_>,
    ) -> bool {
        loop {
            let (plane, plane_type, children) = match self.nodes.get(node as usize) {
                Some(TraceNode::Decision {
                    plane,
                    plane_type,
                    children,
                }) => (plane, *plane_type, *children),
                Some(TraceNode::EmptyLeaf { items }) => {
                    if !items.is_empty() {
                        // A full list drops further leaves
                        let _ = trace.test_nodes.try_push(node);
                    }
                    return false;
                },
                Some(TraceNode::SolidLeaf) | None => {
                    trace.pass_solid = true;
                    trace.hit = start;
                    return !trace.test_all;
                },
            };

            let front = plane_type.distance(plane, start);
            let back = plane_type.distance(plane, end);

            if front >= -TRACE_ON_EPSILON && back >= -TRACE_ON_EPSILON {
                node = children[0];
                continue;
            }
            if front < TRACE_ON_EPSILON && back < TRACE_ON_EPSILON {
                node = children[1];
                continue;
            }

            let side = usize::from(front < 0.0);
            let frac = front / (front - back);
            let mid = start + (end - start) * frac;

            if self.trace_line_r(children[side], start, mid, trace) {
                return true;
            }

            start = mid;
            node = children[side ^ 1];
        }
    }

    /// Tests the triangles of the collected leaves from `first` on. Returns `true` when the
    /// query is finished.
    fn test_candidates(
        &self,
        trace: &mut Trace<'_>,
        first: usize,
    ) -> bool {
        for i in first..trace.test_nodes.len() {
            let node = trace.test_nodes[i];
            let Some(TraceNode::EmptyLeaf { items }) = self.nodes.get(node as usize) else {
                continue;
            };
            for &handle in items.as_slice() {
                let Some(tri) = self.triangles.get(handle) else {
                    continue;
                };
                if self.trace_triangle(tri, trace) && !trace.test_all {
                    return true;
                }
            }
        }
        false
    }

    /// Intersects the query ray with one triangle and applies the shadow policy of its
    /// surface. Returns `true` for a hit that blocks all light.
    pub(crate) fn trace_triangle(
        &self,
        tri: &TraceTriangle,
        trace: &mut Trace<'_>,
    ) -> bool {
        let Some(info) = self.infos.get(tri.info as usize) else {
            return false;
        };

        // Sky never shadows sky
        if trace.compile_flags.intersects(info.compile_flags & CompileFlags::SKY) {
            return false;
        }
        if !accepts_shadow_group(trace.recv_shadows, info.cast_shadows) {
            return false;
        }
        if trace.in_grid && info.skip_grid {
            return false;
        }

        let pvec = trace.direction.cross(tri.edge2);
        let det = tri.edge1.dot(pvec);
        if det.abs() < COPLANAR_EPSILON {
            return false;
        }
        let inv_det = det.recip();

        let tvec = trace.origin - tri.v[0].xyz;
        let u = tvec.dot(pvec) * inv_det;
        if u < -BARY_EPSILON || u > 1.0 + BARY_EPSILON {
            return false;
        }

        let qvec = tvec.cross(tri.edge1);
        let v = trace.direction.dot(qvec) * inv_det;
        if v < -BARY_EPSILON || u + v > 1.0 + BARY_EPSILON {
            return false;
        }

        let depth = tri.edge2.dot(qvec) * inv_det;
        if depth <= trace.inhibit_radius || depth >= trace.distance {
            return false;
        }

        if depth <= SELF_SHADOW_EPSILON && trace.surfaces.contains(&info.surface_num) {
            return false;
        }

        trace.compile_flags |= info.compile_flags;
        if info.compile_flags.contains(CompileFlags::SKY) {
            return false;
        }

        let hit = trace.origin + trace.direction * depth;
        let image = info
            .light_image
            .filter(|_| info.compile_flags.intersects(CompileFlags::FILTERED));
        let Some(image) = image else {
            trace.hit = hit;
            trace.color = DVec3::ZERO;
            trace.opaque = true;
            return true;
        };

        trace.force_sub_sampling = 1.0;

        // Tight bounds so a shared edge does not filter twice
        if u < -ASLF_EPSILON
            || u > 1.0 + ASLF_EPSILON
            || v < -ASLF_EPSILON
            || u + v > 1.0 + ASLF_EPSILON
            || !owns_edge_hit(tri, u, v, trace.direction)
        {
            return false;
        }

        let w = 1.0 - u - v;
        let st = tri.v[0].st * w + tri.v[1].st * u + tri.v[2].st * v;
        let Some(texel) = self.images.sample(image, st.x, st.y) else {
            trace.hit = hit;
            trace.color = DVec3::ZERO;
            trace.opaque = true;
            return true;
        };

        if info.compile_flags.contains(CompileFlags::LIGHTFILTER) {
            trace.color *= DVec3::new(texel.r.into(), texel.g.into(), texel.b.into()) / 255.0;
        }
        if info.compile_flags.contains(CompileFlags::ALPHASHADOW) {
            trace.color *= f64::from(255 - texel.a) / 255.0;
        }

        if trace.color.max_element() <= FILTER_OPAQUE_EPSILON {
            trace.hit = hit;
            trace.color = DVec3::ZERO;
            trace.opaque = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use glam::DVec2;
    use rgb::RGBA8;
    use rstest::rstest;

    use super::*;
    use crate::{
        bsp::{
            BspLevel,
            BspLeaf,
            BspModel,
            BspNode,
            BspPlane,
            DrawVert,
            Entity,
            SurfaceType,
        },
        config::{
            TraceConfig,
            MAX_TRACE_TEST_NODES,
        },
        scene::SceneAssets,
        shader::{
            Image,
            Shader,
            ShaderKey,
        },
    };

    #[rstest]
    #[case(1, 1, true)]
    #[case(1, 3, true)]
    #[case(1, -1, false)]
    #[case(2, 1, true)]
    #[case(2, 2, true)]
    #[case(2, -2, true)]
    #[case(2, 3, false)]
    #[case(-2, 2, true)]
    #[case(-2, -2, true)]
    #[case(-2, 1, false)]
    #[case(-1, 1, true)]
    fn shadow_group_policy(
        #[case] recv: i32,
        #[case] cast: i32,
        #[case] expected: bool,
    ) {
        assert_eq!(accepts_shadow_group(recv, cast), expected);
    }

    /// A 64 unit square at height `z` with texture coordinates spanning `[0, 1)`.
    fn push_quad(
        level: &mut BspLevel,
        shader: ShaderKey,
        z: f64,
    ) -> usize {
        let verts = [(0.0, 0.0), (64.0, 0.0), (64.0, 64.0), (0.0, 64.0)]
            .map(|(x, y)| DrawVert::new(DVec3::new(x, y, z), DVec2::new(x / 64.0, y / 64.0)));
        level.push_triangles(SurfaceType::Planar, shader, &verts, &[0, 1, 2, 0, 2, 3])
    }

    fn finish(mut level: BspLevel) -> BspLevel {
        level.models.push(BspModel {
            first_surface: 0,
            num_surfaces:  level.surfaces.len(),
        });
        level.entities.push(Entity::new().with("classname", "worldspawn"));
        level
    }

    fn down(
        x: f64,
        y: f64,
    ) -> Trace<'static> {
        let mut trace = Trace::new(DVec3::new(x, y, 10.0), DVec3::new(x, y, -10.0));
        trace.setup();
        trace
    }

    #[test]
    fn opaque_surface_blocks() {
        let mut assets = SceneAssets::new();
        let wall = assets.create_shader(Shader::new("wall", CompileFlags::SOLID));
        let mut level = BspLevel::default();
        push_quad(&mut level, wall, 0.0);
        let level = finish(level);

        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(16.0, 40.0);
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
        assert_eq!(trace.color, DVec3::ZERO);
        assert!((trace.hit - DVec3::new(16.0, 40.0, 0.0)).length() < 1e-9);

        let mut trace = down(80.0, 40.0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
        assert_eq!(trace.color, DVec3::ONE);

        // Stops short of the surface
        let mut trace = Trace::new(DVec3::new(16.0, 16.0, 10.0), DVec3::new(16.0, 16.0, 1.0));
        trace.setup();
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);

        let mut trace = down(16.0, 16.0).with_inhibit_radius(12.0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
    }

    #[test]
    fn queries_that_cannot_be_shadowed_pass() {
        let mut assets = SceneAssets::new();
        let wall = assets.create_shader(Shader::new("wall", CompileFlags::SOLID));
        let mut level = BspLevel::default();
        push_quad(&mut level, wall, 0.0);
        let level = finish(level);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(16.0, 16.0).with_recv_shadows(0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);

        let mut trace = down(16.0, 16.0);
        trace.test_occlusion = false;
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);

        // Never set up, so it has no length
        let mut trace = Trace::new(DVec3::new(16.0, 16.0, 10.0), DVec3::new(16.0, 16.0, -10.0));
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
    }

    #[test]
    fn own_surface_does_not_self_shadow() {
        let mut assets = SceneAssets::new();
        let wall = assets.create_shader(Shader::new("wall", CompileFlags::SOLID));
        let mut level = BspLevel::default();
        let surface = push_quad(&mut level, wall, 0.0) as i32;
        let level = finish(level);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let origin = DVec3::new(20.0, 30.0, 0.25);
        let end = DVec3::new(20.0, 30.0, -10.0);

        let surfaces = [surface];
        let mut trace = Trace::new(origin, end).with_surfaces(&surfaces);
        trace.setup();
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);

        let mut trace = Trace::new(origin, end);
        trace.setup();
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
    }

    #[test]
    fn grid_queries_skip_grid_surfaces() {
        let mut assets = SceneAssets::new();
        let wall = assets.create_shader(Shader::new("wall", CompileFlags::SOLID));
        let mut level = BspLevel::default();
        let surface = push_quad(&mut level, wall, 0.0);
        level.surfaces[surface].skip_grid = true;
        let level = finish(level);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(32.0, 8.0);
        trace.in_grid = true;
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);

        let mut trace = down(32.0, 8.0);
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
    }

    fn filtered_tree_assets(flags: CompileFlags) -> SceneAssets {
        let mut assets = SceneAssets::new();
        // Left half: clear red glass, right half: half transparent, solid opaque texel on top
        let pixels = vec![
            RGBA8::new(255, 0, 0, 0),
            RGBA8::new(255, 255, 255, 128),
            RGBA8::new(0, 0, 0, 255),
            RGBA8::new(0, 0, 0, 255),
        ];
        let image = assets.create_image(Image::new(2, 2, pixels).expect("image"));
        assets.create_shader(
            Shader::new("grate", CompileFlags::TRANSLUCENT | flags).with_light_image(image),
        );
        assets
    }

    fn filtered_level(assets: &SceneAssets) -> BspLevel {
        let shader = assets.shaders.find("grate").expect("shader");
        let mut level = BspLevel::default();
        push_quad(&mut level, shader, 0.0);
        finish(level)
    }

    #[test]
    fn clear_alpha_texel_passes_light() {
        let assets = filtered_tree_assets(CompileFlags::ALPHASHADOW);
        let level = filtered_level(&assets);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(12.0, 10.0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
        assert_eq!(trace.color, DVec3::ONE);
        assert_eq!(trace.force_sub_sampling, 1.0);
        assert!(trace.compile_flags.contains(CompileFlags::ALPHASHADOW));

        let mut trace = down(50.0, 10.0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
        assert!((trace.color.x - 127.0 / 255.0).abs() < 1e-12);

        let mut trace = down(10.0, 50.0);
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
        assert!((trace.hit.z).abs() < 1e-9);
    }

    #[test]
    fn light_filter_tints() {
        let assets = filtered_tree_assets(CompileFlags::LIGHTFILTER);
        let level = filtered_level(&assets);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(12.0, 10.0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
        assert_eq!(trace.color, DVec3::new(1.0, 0.0, 0.0));

        let mut trace = down(10.0, 50.0);
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
    }

    #[rstest]
    #[case::fan([0, 1, 2, 0, 2, 3])]
    #[case::diagonal_as_first_edge([0, 2, 1, 2, 0, 3])]
    fn filtered_seam_attenuates_once(#[case] indexes: [u32; 6]) {
        let mut assets = SceneAssets::new();
        let half = assets.create_image(
            Image::new(1, 1, vec![RGBA8::new(255, 255, 255, 128)]).expect("image"),
        );
        let fence = assets.create_shader(
            Shader::new("fence", CompileFlags::TRANSLUCENT | CompileFlags::ALPHASHADOW)
                .with_light_image(half),
        );
        let mut level = BspLevel::default();
        let verts = [(0.0, 0.0), (64.0, 0.0), (64.0, 64.0), (0.0, 64.0)]
            .map(|(x, y)| DrawVert::new(DVec3::new(x, y, 0.0), DVec2::new(x / 64.0, y / 64.0)));
        level.push_triangles(SurfaceType::Planar, fence, &verts, &indexes);
        let level = finish(level);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let once = DVec3::splat(127.0 / 255.0);
        for (x, y) in [
            (10.0, 40.0),
            (40.0, 10.0),
            // On the shared diagonal, inside the edge band and just outside it
            (32.0, 32.0),
            (32.00005, 31.99995),
            (31.99995, 32.00005),
            (32.01, 31.99),
            (31.99, 32.01),
        ] {
            let mut trace = down(x, y);
            tree.trace_line(&mut trace);
            assert!(!trace.opaque);
            assert!(
                (trace.color - once).abs().max_element() < 1e-9,
                "({x}, {y}) filtered to {}",
                trace.color
            );
        }
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn candidate_overflow_truncates() {
        const LEAVES: usize = 300;

        let mut assets = SceneAssets::new();
        let clear = assets.create_image(Image::new(1, 1, vec![RGBA8::new(0, 0, 0, 0)]).expect("image"));
        let glass = assets.create_shader(
            Shader::new("glass", CompileFlags::TRANSLUCENT | CompileFlags::ALPHASHADOW)
                .with_light_image(clear),
        );
        let wall = assets.create_shader(Shader::new("wall", CompileFlags::SOLID));

        // A stack of slabs one unit thick, node i splitting at z = i + 1
        let mut level = BspLevel::default();
        for i in 0..LEAVES {
            let back = -1 - i32::try_from(i).expect("leaf");
            let front = if i + 1 < LEAVES {
                i32::try_from(i + 1).expect("node")
            } else {
                back - 1
            };
            level.planes.push(BspPlane::new(DVec3::Z, (i + 1) as f64));
            level.nodes.push(BspNode {
                plane_num: i,
                children:  [front, back],
            });
            level.leafs.push(BspLeaf { cluster: 0 });
        }
        level.leafs.push(BspLeaf { cluster: 0 });

        // Clear glass in every slab but the last, which is walled off
        for i in 0..LEAVES {
            let shader = if i + 1 == LEAVES { wall } else { glass };
            push_quad(&mut level, shader, i as f64 + 0.5);
        }
        let level = finish(level);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");
        assert_eq!(tree.nodes().len(), 2 * LEAVES + 2);

        let top = LEAVES as f64 + 1.0;
        let mut trace = Trace::new(DVec3::new(40.0, 20.0, 0.0), DVec3::new(40.0, 20.0, top));
        trace.setup();
        tree.trace_line(&mut trace);
        assert_eq!(trace.test_nodes().len(), MAX_TRACE_TEST_NODES);
        assert!(!trace.opaque);
        assert_eq!(trace.color, DVec3::ONE);
        assert!(trace.compile_flags.contains(CompileFlags::ALPHASHADOW));

        // Starting above the cut the wall is collected and blocks
        let mut trace = Trace::new(
            DVec3::new(40.0, 20.0, top - 20.0),
            DVec3::new(40.0, 20.0, top),
        );
        trace.setup();
        tree.trace_line(&mut trace);
        assert!(trace.test_nodes().len() < MAX_TRACE_TEST_NODES);
        assert!(trace.opaque);
        assert!((trace.hit.z - (top - 1.5)).abs() < 1e-9);
        let wall_info = tree
            .triangles_under(tree.head())
            .find_map(|tri| tree.info(tri.info).filter(|info| info.shader == wall));
        assert!(wall_info.is_some());
    }

    #[test]
    fn sky_is_not_an_occluder() {
        let mut assets = SceneAssets::new();
        let sky = assets.create_shader(Shader::new("sky", CompileFlags::SKY | CompileFlags::SOLID));
        let wall = assets.create_shader(Shader::new("wall", CompileFlags::SOLID));
        let mut level = BspLevel::default();
        push_quad(&mut level, sky, 0.0);
        let portal = push_quad(&mut level, wall, -5.0);
        level.surfaces[portal].sky_portal = true;
        let level = finish(level);
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(40.0, 20.0);
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
        assert!(trace.compile_flags.contains(CompileFlags::SKY));

        // Exhaustive queries that touch sky also see the skybox behind it
        let mut trace = down(40.0, 20.0);
        trace.test_all = true;
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
        assert!((trace.hit.z + 5.0).abs() < 1e-9);

        let mut trace = down(40.0, 20.0);
        trace.test_sky = true;
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
    }

    #[test]
    fn solid_space_blocks() {
        let assets = SceneAssets::new();
        let level = finish(BspLevel {
            planes: vec![BspPlane::new(DVec3::Z, 0.0)],
            nodes: vec![BspNode {
                plane_num: 0,
                children:  [-1, -2],
            }],
            leafs: vec![BspLeaf { cluster: 0 }, BspLeaf { cluster: -1 }],
            ..BspLevel::default()
        });
        let config = TraceConfig::default();
        let tree = TraceTree::build(&level, &assets, &config).expect("build");

        let mut trace = down(5.0, 5.0);
        tree.trace_line(&mut trace);
        assert!(trace.opaque);
        assert!(trace.pass_solid);
        assert!(trace.hit.z.abs() < 1e-9);

        let mut trace = Trace::new(DVec3::new(0.0, 0.0, 30.0), DVec3::new(50.0, 0.0, 5.0));
        trace.setup();
        tree.trace_line(&mut trace);
        assert!(!trace.opaque);
        assert!(!trace.pass_solid);
    }
}
