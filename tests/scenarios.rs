// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::{
    DVec2,
    DVec3,
};
use rand::{
    rngs::StdRng,
    Rng,
    SeedableRng,
};
use rgb::RGBA8;
use shadow_trace::{
    bsp::{
        BspLeaf,
        BspLevel,
        BspModel,
        BspNode,
        BspPlane,
        DrawVert,
        Entity,
        SurfaceType,
    },
    shader::{
        CompileFlags,
        Image,
        Shader,
        ShaderKey,
    },
    trace::TraceNode,
    SceneAssets,
    Trace,
    TraceConfig,
    TraceTree,
};

fn finish(mut level: BspLevel) -> BspLevel {
    level.models.push(BspModel {
        first_surface: 0,
        num_surfaces:  level.surfaces.len(),
    });
    level.entities.push(Entity::new().with("classname", "worldspawn"));
    level
}

fn push_quad(
    level: &mut BspLevel,
    shader: ShaderKey,
    min: DVec2,
    max: DVec2,
    z: f64,
) -> usize {
    let verts = [(min.x, min.y), (max.x, min.y), (max.x, max.y), (min.x, max.y)].map(|(x, y)| {
        DrawVert::new(
            DVec3::new(x, y, z),
            (DVec2::new(x, y) - min) / (max - min),
        )
    });
    level.push_triangles(SurfaceType::Planar, shader, &verts, &[0, 1, 2, 0, 2, 3])
}

fn push_cube(
    level: &mut BspLevel,
    shader: ShaderKey,
    size: f64,
) -> usize {
    let verts: Vec<DrawVert> = (0..8)
        .map(|i| {
            let corner = DVec3::new(
                f64::from(i & 1),
                f64::from((i >> 1) & 1),
                f64::from((i >> 2) & 1),
            );
            DrawVert::new(corner * size, corner.truncate())
        })
        .collect();
    #[rustfmt::skip]
    let indexes = [
        0, 2, 1, 1, 2, 3,
        4, 5, 6, 5, 7, 6,
        0, 1, 4, 1, 5, 4,
        2, 6, 3, 3, 6, 7,
        0, 4, 2, 2, 4, 6,
        1, 3, 5, 3, 7, 5,
    ];
    level.push_triangles(SurfaceType::TriangleSoup, shader, &verts, &indexes)
}

fn cast(
    tree: &TraceTree<'_>,
    origin: DVec3,
    end: DVec3,
) -> Trace<'static> {
    let mut trace = Trace::new(origin, end);
    trace.setup();
    tree.trace_line(&mut trace);
    trace
}

#[test]
fn cube_blocks_rays_through_it() {
    let mut assets = SceneAssets::new();
    let stone = assets.create_shader(Shader::new("textures/stone", CompileFlags::SOLID));
    let mut level = BspLevel::default();
    push_cube(&mut level, stone, 64.0);
    let level = finish(level);

    let tree = TraceTree::build(&level, &assets, &TraceConfig::default()).expect("build");
    assert_eq!(tree.stats().trace_infos, 1);
    assert_eq!(tree.stats().triangles, tree.triangles_under(tree.head()).count());
    let stored = tree
        .nodes()
        .iter()
        .flat_map(TraceNode::items)
        .filter_map(|&handle| tree.triangle(handle))
        .count();
    assert_eq!(stored, tree.stats().triangles);

    // Straight through the face centre, along a diagonal and the split planes
    for (y, z) in [(32.0, 32.0), (20.0, 30.0)] {
        let trace = cast(&tree, DVec3::new(-10.0, y, z), DVec3::new(10.0, y, z));
        assert!(trace.opaque);
        assert!(trace.hit.x.abs() < 1e-6, "hit {}", trace.hit);
        assert!(trace.compile_flags.contains(CompileFlags::SOLID));
    }

    let trace = cast(&tree, DVec3::new(70.0, 32.0, 32.0), DVec3::new(100.0, 32.0, 32.0));
    assert!(!trace.opaque);
    assert_eq!(trace.color, DVec3::ONE);

    // Passes over the top
    let trace = cast(&tree, DVec3::new(-10.0, 32.0, 80.0), DVec3::new(80.0, 32.0, 70.0));
    assert!(!trace.opaque);
}

#[test]
fn shared_edges_do_not_leak() {
    let mut assets = SceneAssets::new();
    let stone = assets.create_shader(Shader::new("textures/stone", CompileFlags::SOLID));
    let mut level = BspLevel::default();
    push_quad(&mut level, stone, DVec2::ZERO, DVec2::ONE, 0.0);
    let level = finish(level);

    let tree = TraceTree::build(&level, &assets, &TraceConfig::default()).expect("build");
    assert_eq!(tree.stats().triangles, 2);

    for offset in [DVec2::ZERO, DVec2::new(1e-6, -1e-6), DVec2::new(-1e-6, 1e-6)] {
        let at = (DVec2::splat(0.5) + offset).extend(0.0);
        let trace = cast(&tree, at + DVec3::Z, at - DVec3::Z);
        assert!(trace.opaque, "leaked at {at}");
        assert!((trace.hit - at).length() < 1e-6);
    }
}

#[test]
fn clear_texels_let_light_through() {
    let mut assets = SceneAssets::new();
    let clear = assets.create_image(Image::new(1, 1, vec![RGBA8::new(200, 10, 10, 0)]).expect("image"));
    let fence = assets.create_shader(
        Shader::new("textures/fence", CompileFlags::TRANSLUCENT | CompileFlags::ALPHASHADOW)
            .with_light_image(clear),
    );
    let mut level = BspLevel::default();
    push_quad(&mut level, fence, DVec2::ZERO, DVec2::splat(64.0), 0.0);
    let level = finish(level);

    let tree = TraceTree::build(&level, &assets, &TraceConfig::default()).expect("build");
    let trace = cast(&tree, DVec3::new(10.0, 20.0, 10.0), DVec3::new(10.0, 20.0, -10.0));
    assert!(!trace.opaque);
    assert_eq!(trace.color, DVec3::ONE);
    assert!(trace.compile_flags.contains(CompileFlags::ALPHASHADOW));
    assert!(trace.force_sub_sampling > 0.0);
}

#[test]
fn rays_inside_solid_space_are_blocked() {
    let level = finish(BspLevel {
        planes: vec![BspPlane::new(DVec3::Z, 0.0)],
        nodes: vec![BspNode {
            plane_num: 0,
            children:  [-1, -2],
        }],
        leafs: vec![BspLeaf { cluster: 0 }, BspLeaf { cluster: -1 }],
        ..BspLevel::default()
    });
    let assets = SceneAssets::new();
    let tree = TraceTree::build(&level, &assets, &TraceConfig::default()).expect("build");

    let trace = cast(&tree, DVec3::new(0.0, 0.0, -10.0), DVec3::new(0.0, 0.0, -20.0));
    assert!(trace.opaque);
    assert!(trace.pass_solid);
    assert_eq!(trace.color, DVec3::ZERO);

    let trace = cast(&tree, DVec3::new(0.0, 0.0, 10.0), DVec3::new(50.0, 0.0, 20.0));
    assert!(!trace.opaque);
    assert!(!trace.pass_solid);
}

#[test]
fn receivers_ignore_their_own_surface() {
    let mut assets = SceneAssets::new();
    let stone = assets.create_shader(Shader::new("textures/stone", CompileFlags::SOLID));
    let mut level = BspLevel::default();
    let floor = push_quad(&mut level, stone, DVec2::ZERO, DVec2::splat(64.0), 0.0);
    let level = finish(level);
    let tree = TraceTree::build(&level, &assets, &TraceConfig::default()).expect("build");

    let surfaces = [i32::try_from(floor).expect("surface")];
    let origin = DVec3::new(20.0, 30.0, 0.25);
    let end = DVec3::new(20.0, 30.0, -40.0);

    let mut trace = Trace::new(origin, end).with_surfaces(&surfaces);
    trace.setup();
    tree.trace_line(&mut trace);
    assert!(!trace.opaque);

    let trace = cast(&tree, origin, end);
    assert!(trace.opaque);
}

#[test]
fn rebuilding_gives_identical_answers() {
    let mut assets = SceneAssets::new();
    let stone = assets.create_shader(Shader::new("textures/stone", CompileFlags::SOLID));
    let mut level = BspLevel::default();
    push_cube(&mut level, stone, 64.0);
    for z in [80.0, 112.0, 144.0] {
        push_quad(&mut level, stone, DVec2::splat(-32.0), DVec2::splat(48.0), z);
    }
    let level = finish(level);

    let config = TraceConfig::default();
    let first = TraceTree::build(&level, &assets, &config).expect("build");
    let second = TraceTree::build(&level, &assets, &config).expect("build");
    assert_eq!(first.stats(), second.stats());

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut blocked = 0;
    for _ in 0..500 {
        let mut point = || {
            DVec3::new(
                rng.gen_range(-64.0..128.0),
                rng.gen_range(-64.0..128.0),
                rng.gen_range(-16.0..192.0),
            )
        };
        let (origin, end) = (point(), point());
        let a = cast(&first, origin, end);
        let b = cast(&second, origin, end);
        assert_eq!(a.opaque, b.opaque);
        assert_eq!(a.color, b.color);
        assert_eq!(a.hit, b.hit);
        blocked += usize::from(a.opaque);
    }
    assert!(blocked > 0);
}

#[test]
fn triangulation_preserves_area() {
    let mut assets = SceneAssets::new();
    let stone = assets.create_shader(Shader::new("textures/stone", CompileFlags::SOLID));
    let mut level = BspLevel::default();
    for z in [8.0, 40.0, 72.0] {
        push_quad(&mut level, stone, DVec2::ZERO, DVec2::splat(256.0), z);
    }
    let level = finish(level);

    let tree = TraceTree::build(&level, &assets, &TraceConfig::default()).expect("build");
    assert!(tree.stats().nodes > 2, "leaf was not subdivided");

    let area: f64 = tree.triangles_under(tree.head()).map(|t| t.area()).sum();
    assert!((area - 3.0 * 256.0 * 256.0).abs() < 1e-6, "area {area}");

    let low_memory = TraceConfig {
        low_memory: true,
        ..TraceConfig::default()
    };
    let flat = TraceTree::build(&level, &assets, &low_memory).expect("build");
    assert_eq!(flat.stats().triangles, 6);
}
