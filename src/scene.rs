// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use std::collections::HashMap;

use crate::{
    model::ModelWalker,
    shader::{
        Image,
        ImageKey,
        ImagePool,
        Shader,
        ShaderKey,
        ShaderTable,
    },
};

/// Shaders, light images and external models available while populating the trace tree.
#[derive(Default)]
pub struct SceneAssets {
    pub shaders: ShaderTable,
    pub images:  ImagePool,
    models:      HashMap<String, Vec<Box<dyn ModelWalker + Send + Sync>>>,
}

impl std::fmt::Debug for SceneAssets {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SceneAssets")
            .field("shaders", &self.shaders.len())
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SceneAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_shader(
        &mut self,
        shader: Shader,
    ) -> ShaderKey {
        self.shaders.insert(shader)
    }

    pub fn create_image(
        &mut self,
        image: Image,
    ) -> ImageKey {
        self.images.insert(image)
    }

    pub fn shader(
        &self,
        key: ShaderKey,
    ) -> Option<&Shader> {
        self.shaders.get(key)
    }

    /// Registers an external model under the name entities use in their `model` key.
    pub fn insert_model<W>(
        &mut self,
        name: &str,
        surfaces: impl IntoIterator<Item = W>,
    ) where
        W: ModelWalker + Send + Sync + 'static,
    {
        let surfaces: Vec<Box<dyn ModelWalker + Send + Sync>> = surfaces
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn ModelWalker + Send + Sync>)
            .collect();
        tracing::debug!(name, surfaces = surfaces.len(), "registered model");
        self.models.insert(name.to_ascii_lowercase(), surfaces);
    }

    pub fn model(
        &self,
        name: &str,
    ) -> Option<&[Box<dyn ModelWalker + Send + Sync>]> {
        self.models.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }
}
