// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! The shadow ray acceleration tree.
//!
//! [`TraceTree::build`] mirrors the compiled partition, filters every shadow casting
//! triangle into it, subdivides crowded leaves and fan-triangulates what is left. The
//! finished tree is immutable, so any number of threads can run
//! [`TraceTree::trace_line`] against it at once.

mod build;
mod line;
mod node;
mod pool;
mod populate;
mod query;
mod winding;

pub use build::{
    BuildStats,
    TreeBuilder,
};
use glam::DVec3;
pub use line::accepts_shadow_group;
pub use node::{
    NodeItems,
    PlaneType,
    TraceNode,
};
pub use pool::{
    Pool,
    TraceInfo,
    TraceInfoTable,
};
pub use query::Trace;
use tracing::{
    info,
    instrument,
};
pub use winding::{
    TracePlane,
    TraceTriangle,
    TraceVert,
    TraceWinding,
};

use crate::{
    bsp::BspLevel,
    config::TraceConfig,
    error::TraceError,
    scene::SceneAssets,
    shader::ImagePool,
};

#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub max: DVec3,
    pub min: DVec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundingBox {
    /// An inverted box that any point will grow.
    pub const fn new() -> Self {
        Self {
            max: DVec3::splat(f64::MIN),
            min: DVec3::splat(f64::MAX),
        }
    }

    #[inline]
    pub fn grow_to_include_point(
        &mut self,
        point: DVec3,
    ) {
        self.max = self.max.max(point);
        self.min = self.min.min(point);
    }

    /// Extent on each axis, negative while the box is still empty.
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }
}

/// The finished world and skybox trees, sharing one node and triangle store.
#[derive(Debug)]
pub struct TraceTree<'a> {
    nodes:     Vec<TraceNode>,
    triangles: Pool<TraceTriangle>,
    infos:     Vec<TraceInfo>,
    head:      u32,
    skybox:    u32,
    images:    &'a ImagePool,
    stats:     BuildStats,
}

impl<'a> TraceTree<'a> {
    /// Builds both trees from the level and the assets it references.
    ///
    /// Must finish before any query runs. Light images are borrowed for texel lookups.
    #[instrument(skip_all)]
    pub fn build(
        level: &BspLevel,
        assets: &'a SceneAssets,
        config: &TraceConfig,
    ) -> Result<Self, TraceError> {
        let mut builder = TreeBuilder::new(config);
        builder.mirror_bsp(level)?;
        builder.populate(level, assets)?;
        builder.finalize()?;

        let tree = builder.finish(&assets.images);
        let stats = tree.stats;
        #[allow(clippy::cast_precision_loss)]
        let per_leaf = stats.windings as f64 / stats.leaf_nodes.max(1) as f64;
        info!(
            trace_infos = stats.trace_infos,
            windings = stats.windings,
            triangles = stats.triangles,
            nodes = stats.nodes,
            leaf_nodes = stats.leaf_nodes,
            windings_per_leaf = per_leaf,
            max_depth = stats.max_depth,
            degenerate = stats.degenerate,
            "trace tree built"
        );
        Ok(tree)
    }

    pub const fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub const fn head(&self) -> u32 {
        self.head
    }

    pub const fn skybox(&self) -> u32 {
        self.skybox
    }

    pub fn nodes(&self) -> &[TraceNode] {
        &self.nodes
    }

    pub fn triangle(
        &self,
        handle: u32,
    ) -> Option<&TraceTriangle> {
        self.triangles.get(handle)
    }

    pub fn info(
        &self,
        index: u32,
    ) -> Option<&TraceInfo> {
        self.infos.get(index as usize)
    }

    /// Every triangle stored under `node`, duplicates across leaves included.
    pub fn triangles_under(
        &self,
        node: u32,
    ) -> impl Iterator<Item = &TraceTriangle> + '_ {
        let mut stack = vec![node];
        let mut leaf: &[u32] = &[];
        std::iter::from_fn(move || loop {
            if let Some((&first, rest)) = leaf.split_first() {
                leaf = rest;
                if let Some(tri) = self.triangles.get(first) {
                    return Some(tri);
                }
                continue;
            }
            match self.nodes.get(stack.pop()? as usize)? {
                TraceNode::Decision { children, .. } => stack.extend_from_slice(children),
                TraceNode::EmptyLeaf { items } => leaf = items.as_slice(),
                TraceNode::SolidLeaf => {},
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_grows_from_empty() {
        let mut bounds = BoundingBox::new();
        assert!(bounds.is_empty());
        bounds.grow_to_include_point(DVec3::new(1.0, -2.0, 3.0));
        bounds.grow_to_include_point(DVec3::new(-1.0, 2.0, 0.0));
        assert!(!bounds.is_empty());
        assert_eq!(bounds.size(), DVec3::new(2.0, 4.0, 3.0));
    }
}
