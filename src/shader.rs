// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::Path,
};

use bitflags::bitflags;
use rgb::RGBA8;
use slotmap::SlotMap;

use crate::error::TraceError;

bitflags! {
    /// Compile-time surface properties gathered from shader scripts.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CompileFlags: u32 {
        const SOLID       = 0x0000_0001;
        const TRANSLUCENT = 0x0000_0002;
        const NODRAW      = 0x0000_0010;
        const ALPHASHADOW = 0x0000_0040;
        const LIGHTFILTER = 0x0000_0080;
        const LIQUID      = 0x0000_0200;
        const FOG         = 0x0000_0400;
        const SKY         = 0x0000_0800;
        const DETAIL      = 0x0800_0000;
    }
}

impl CompileFlags {
    /// Surfaces whose texture modulates light instead of blocking it.
    pub const FILTERED: Self = Self::ALPHASHADOW.union(Self::LIGHTFILTER);
}

slotmap::new_key_type! {
    pub struct ShaderKey;
    pub struct ImageKey;
}

#[derive(Clone, Debug)]
pub struct Shader {
    pub name:          String,
    pub compile_flags: CompileFlags,
    pub content_flags: u32,
    pub surface_flags: u32,
    /// Image sampled by alpha-shadow and light-filter surfaces.
    pub light_image:   Option<ImageKey>,
}

impl Shader {
    pub fn new(
        name: impl Into<String>,
        compile_flags: CompileFlags,
    ) -> Self {
        Self {
            name: name.into(),
            compile_flags,
            content_flags: 0,
            surface_flags: 0,
            light_image: None,
        }
    }

    #[must_use]
    pub fn with_light_image(
        mut self,
        image: ImageKey,
    ) -> Self {
        self.light_image = Some(image);
        self
    }

    /// Whether a surface using this shader can ever occlude light.
    pub fn casts_shadows(&self) -> bool {
        if self.compile_flags.contains(CompileFlags::NODRAW) {
            return false;
        }
        !self.compile_flags.contains(CompileFlags::TRANSLUCENT)
            || self.compile_flags.intersects(CompileFlags::FILTERED)
    }
}

#[derive(Debug, Default)]
pub struct ShaderTable {
    shaders: SlotMap<ShaderKey, Shader>,
    by_name: HashMap<String, ShaderKey>,
}

impl ShaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `shader`, replacing the lookup for a previous shader with the same name.
    pub fn insert(
        &mut self,
        shader: Shader,
    ) -> ShaderKey {
        let name = shader.name.to_ascii_lowercase();
        let key = self.shaders.insert(shader);
        self.by_name.insert(name, key);
        key
    }

    pub fn get(
        &self,
        key: ShaderKey,
    ) -> Option<&Shader> {
        self.shaders.get(key)
    }

    /// Shader names compare case-insensitively.
    pub fn find(
        &self,
        name: &str,
    ) -> Option<ShaderKey> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Image {
    width:  usize,
    height: usize,
    pixels: Vec<RGBA8>,
}

impl Image {
    /// Returns `None` when `pixels` does not hold exactly `width * height` texels.
    pub fn new(
        width: usize,
        height: usize,
        pixels: Vec<RGBA8>,
    ) -> Option<Self> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn load_png(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let mut decoder = png::Decoder::new(BufReader::new(File::open(path)?));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;
        let bytes = &buf[..info.buffer_size()];

        let pixels: Vec<RGBA8> = match info.color_type {
            png::ColorType::Rgba => bytes
                .chunks_exact(4)
                .map(|p| RGBA8::new(p[0], p[1], p[2], p[3]))
                .collect(),
            png::ColorType::Rgb => bytes
                .chunks_exact(3)
                .map(|p| RGBA8::new(p[0], p[1], p[2], u8::MAX))
                .collect(),
            png::ColorType::GrayscaleAlpha => bytes
                .chunks_exact(2)
                .map(|p| RGBA8::new(p[0], p[0], p[0], p[1]))
                .collect(),
            png::ColorType::Grayscale => bytes
                .iter()
                .map(|&p| RGBA8::new(p, p, p, u8::MAX))
                .collect(),
            other @ png::ColorType::Indexed => return Err(TraceError::ImageFormat(other)),
        };

        let width = info.width as usize;
        let height = info.height as usize;
        Self::new(width, height, pixels).ok_or(TraceError::ImageFormat(info.color_type))
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    /// Nearest texel lookup with `s` and `t` wrapped into `[0, 1)`.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(
        &self,
        s: f64,
        t: f64,
    ) -> RGBA8 {
        let s = s - s.floor();
        let t = t - t.floor();

        // Saturating casts, then clamp the wrapped 1.0 edge case
        let x = ((s * self.width as f64) as usize).min(self.width - 1);
        let y = ((t * self.height as f64) as usize).min(self.height - 1);
        self.pixels[y * self.width + x]
    }
}

/// Images referenced by filtered shaders. Filled before tracing starts and read-only after.
#[derive(Debug, Default)]
pub struct ImagePool {
    images: SlotMap<ImageKey, Image>,
}

impl ImagePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        image: Image,
    ) -> ImageKey {
        self.images.insert(image)
    }

    pub fn load_png(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<ImageKey, TraceError> {
        let path = path.as_ref();
        let image = Image::load_png(path)?;
        tracing::debug!(path = %path.display(), width = image.width, height = image.height, "loaded light image");
        Ok(self.insert(image))
    }

    pub fn get(
        &self,
        key: ImageKey,
    ) -> Option<&Image> {
        self.images.get(key)
    }

    pub fn sample(
        &self,
        key: ImageKey,
        s: f64,
        t: f64,
    ) -> Option<RGBA8> {
        self.images.get(key).map(|image| image.sample(s, t))
    }
}
