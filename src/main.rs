// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::{
    io::Write,
    path::PathBuf,
};

use clap::Parser;
use glam::{
    DVec2,
    DVec3,
};
use indicatif::{
    ParallelProgressIterator,
    ProgressBar,
};
use rand::Rng;
use rayon::iter::{
    IndexedParallelIterator,
    IntoParallelRefMutIterator,
    ParallelIterator,
};
use rgb::{
    Rgb,
    RGBA8,
};
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
    model::{
        GltfModel,
        ModelWalker,
    },
    shader::{
        CompileFlags,
        Image,
        Shader,
        ShaderKey,
    },
    SceneAssets,
    Trace,
    TraceConfig,
    TraceTree,
};
use tracing::info;

/// Edge length of the demo floor in world units.
const FLOOR_SIZE: f64 = 256.0;

/// Bakes the shadow mask of a small demo level into a PNG.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(short, long, default_value = "shadow.png")]
    output: PathBuf,

    /// Lightmap texels per side.
    #[arg(short, long, default_value_t = 256)]
    size: u32,

    /// Shadow rays per texel.
    #[arg(long, default_value_t = 4)]
    samples: u32,

    /// Light position as "x y z".
    #[arg(long, value_parser = parse_vec3, default_value = "200 40 400")]
    light: DVec3,

    /// Light rays are jittered across a square of this half-size.
    #[arg(long, default_value_t = 12.0)]
    light_radius: f64,

    /// glTF model placed on the floor as a shadow casting entity.
    #[arg(short, long)]
    model: Option<PathBuf>,

    #[arg(long, default_value_t = 64.0)]
    model_scale: f64,

    /// PNG whose alpha channel replaces the generated grate pattern.
    #[arg(long)]
    grate_image: Option<PathBuf>,

    #[arg(long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// Let curved patches cast shadows.
    #[arg(long)]
    patch_shadows: bool,

    /// Skip adaptive subdivision of the trace tree.
    #[arg(long)]
    low_memory: bool,
}

fn parse_vec3(value: &str) -> Result<DVec3, String> {
    let parts = value
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    match parts.as_slice() {
        &[x, y, z] => Ok(DVec3::new(x, y, z)),
        _ => Err(format!("expected three numbers, got {}", parts.len())),
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn process_texel(mut input: DVec3) -> Rgb<u16> {
    input = input.clamp(DVec3::ZERO, DVec3::ONE);
    // Gamma correction
    input = input.powf(1.0 / 1.8);

    // Saturating cast - Will auto-clamp within bounds of u16
    input *= f64::from(u16::MAX);
    Rgb::new(input.x as u16, input.y as u16, input.z as u16)
}

/// Alternating clear and solid bars, two texels wide.
fn grate_image() -> Option<Image> {
    let pixels = (0..8 * 8)
        .map(|i| {
            let alpha = if (i % 8) / 2 % 2 == 0 { 0 } else { 255 };
            RGBA8::new(90, 90, 100, alpha)
        })
        .collect();
    Image::new(8, 8, pixels)
}

fn push_quad(
    level: &mut BspLevel,
    shader: ShaderKey,
    corners: [DVec3; 4],
) -> usize {
    let verts = corners.map(|p| DrawVert::new(p, DVec2::new(p.x, p.y) / 32.0));
    level.push_triangles(SurfaceType::Planar, shader, &verts, &[0, 1, 2, 0, 2, 3])
}

fn push_box(
    level: &mut BspLevel,
    shader: ShaderKey,
    min: DVec3,
    max: DVec3,
) -> usize {
    let verts: Vec<DrawVert> = (0..8)
        .map(|i| {
            let p = DVec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            );
            DrawVert::new(p, DVec2::new(p.x + p.z, p.y + p.z) / 64.0)
        })
        .collect();
    #[rustfmt::skip]
    let indexes = [
        0, 2, 1, 1, 2, 3, // bottom
        4, 5, 6, 5, 7, 6, // top
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    level.push_triangles(SurfaceType::TriangleSoup, shader, &verts, &indexes)
}

/// A floor over solid ground with a box, a grate and an arch on it.
///
/// Returns the level and the surface number of the floor.
fn demo_level(
    assets: &mut SceneAssets,
    args: &Args,
) -> Result<(BspLevel, usize), Box<dyn std::error::Error>> {
    let floor_shader = assets.create_shader(Shader::new("textures/demo/floor", CompileFlags::SOLID));
    let box_shader = assets.create_shader(Shader::new("textures/demo/box", CompileFlags::SOLID));
    let arch_shader = assets.create_shader(Shader::new("textures/demo/arch", CompileFlags::SOLID));
    let grate = match &args.grate_image {
        Some(path) => assets.images.load_png(path)?,
        None => assets.create_image(grate_image().ok_or("grate image size mismatch")?),
    };
    let grate_shader = assets.create_shader(
        Shader::new(
            "textures/demo/grate",
            CompileFlags::TRANSLUCENT | CompileFlags::ALPHASHADOW,
        )
        .with_light_image(grate),
    );

    // Open space above z = 0, solid below
    let mut level = BspLevel {
        planes: vec![BspPlane::new(DVec3::Z, 0.0)],
        nodes: vec![BspNode {
            plane_num: 0,
            children:  [-1, -2],
        }],
        leafs: vec![BspLeaf { cluster: 0 }, BspLeaf { cluster: -1 }],
        ..BspLevel::default()
    };

    let floor = push_quad(&mut level, floor_shader, [
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(FLOOR_SIZE, 0.0, 0.0),
        DVec3::new(FLOOR_SIZE, FLOOR_SIZE, 0.0),
        DVec3::new(0.0, FLOOR_SIZE, 0.0),
    ]);
    push_box(
        &mut level,
        box_shader,
        DVec3::new(96.0, 96.0, 32.0),
        DVec3::new(160.0, 160.0, 96.0),
    );
    push_quad(&mut level, grate_shader, [
        DVec3::new(16.0, 144.0, 128.0),
        DVec3::new(112.0, 144.0, 128.0),
        DVec3::new(112.0, 240.0, 128.0),
        DVec3::new(16.0, 240.0, 128.0),
    ]);

    let arch: Vec<DrawVert> = [16.0, 48.0, 80.0]
        .into_iter()
        .flat_map(|y| {
            [(176.0, 0.0), (208.0, 160.0), (240.0, 0.0)]
                .map(|(x, z)| DrawVert::new(DVec3::new(x, y, z), DVec2::new(x, y) / 64.0))
        })
        .collect();
    level.push_patch(arch_shader, 3, 3, &arch);

    level.models.push(BspModel {
        first_surface: 0,
        num_surfaces:  level.surfaces.len(),
    });
    level.entities.push(Entity::new().with("classname", "worldspawn"));

    if let Some(path) = &args.model {
        let model = GltfModel::load(path)?;
        for surface in model.surfaces() {
            if assets.shaders.find(surface.shader_name()).is_none() {
                assets.create_shader(Shader::new(surface.shader_name(), CompileFlags::SOLID));
            }
        }
        assets.insert_model("demo_model", model.into_surfaces());
        level.entities.push(
            Entity::new()
                .with("classname", "misc_model")
                .with("model", "demo_model")
                .with("origin", "64 64 0")
                .with("modelscale", &args.model_scale.to_string())
                .with("_castShadows", "1"),
        );
    }

    Ok((level, floor))
}

#[allow(clippy::cast_precision_loss)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let fmt_subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)?;

    let config = TraceConfig {
        patch_shadows: args.patch_shadows,
        low_memory: args.low_memory,
        ..TraceConfig::default()
    };

    info!("Building trace tree...");
    let begin_time = std::time::Instant::now();

    let mut assets = SceneAssets::new();
    let (level, floor) = demo_level(&mut assets, &args)?;
    let tree = TraceTree::build(&level, &assets, &config)?;

    info!(elapsed_ms = begin_time.elapsed().as_millis(), "Trace tree built");

    let size = args.size as usize;
    let samples = args.samples.max(1);
    let floor_surfaces = [i32::try_from(floor)?];
    let mut lightmap = vec![Rgb::<u16>::default(); size * size];

    info!(texels = lightmap.len(), samples, "Tracing shadow rays");
    let begin_time = std::time::Instant::now();

    let bar = ProgressBar::new(lightmap.len() as u64);
    lightmap
        .par_iter_mut()
        .enumerate()
        .progress_with(bar)
        .for_each(|(idx, px)| {
            let mut rng = rand::thread_rng();
            let texel = DVec2::new((idx % size) as f64, (idx / size) as f64) + 0.5;
            let point = (texel * FLOOR_SIZE / size as f64).extend(0.0);

            let mut light = DVec3::ZERO;
            for _ in 0..samples {
                let jitter = DVec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.0)
                    * args.light_radius;
                let mut trace = Trace::new(point, args.light + jitter).with_surfaces(&floor_surfaces);
                trace.setup();
                tree.trace_line(&mut trace);
                if !trace.opaque {
                    light += trace.color;
                }
            }

            *px = process_texel(light / f64::from(samples));
        });

    info!(elapsed_s = begin_time.elapsed().as_secs_f32(), "Traced");

    // Write results to a PNG
    let size = u32::try_from(size)?;
    let mut encoder = png::Encoder::new(std::fs::File::create(&args.output)?, size, size);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Sixteen);
    encoder.set_source_gamma(png::ScaledFloat::new(1.0 / 1.8));
    encoder.set_srgb(png::SrgbRenderingIntent::Perceptual);
    let mut writer = encoder.write_header()?;
    let mut stream = writer.stream_writer()?;

    for px in bytemuck::must_cast_slice::<_, u16>(&lightmap) {
        stream.write_all(&px.to_be_bytes())?;
    }

    stream.finish()?;
    writer.finish()?;

    info!(path = %args.output.display(), "Wrote shadow mask");
    Ok(())
}
