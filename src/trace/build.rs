// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::DVec3;

use super::{
    node::{
        NodeItems,
        TraceNode,
    },
    pool::{
        Pool,
        TraceInfoTable,
    },
    winding::{
        TracePlane,
        TraceTriangle,
        TraceWinding,
    },
    BoundingBox,
    TraceTree,
};
use crate::{
    bsp::{
        BspChild,
        BspLevel,
    },
    config::{
        TraceConfig,
        PLANE_MATCH_DIST,
        PLANE_MATCH_DOT,
    },
    error::TraceError,
    shader::ImagePool,
};

/// Counters gathered while building, reported once the tree is finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub trace_infos: usize,
    /// Winding fragments stored in leaves during filtering.
    pub windings:    usize,
    pub triangles:   usize,
    pub nodes:       usize,
    pub leaf_nodes:  usize,
    pub max_depth:   u32,
    /// Windings dropped because their first three points are collinear.
    pub degenerate:  usize,
}

/// Mutable construction state for one `TraceTree`, discarded once the tree is finished.
pub struct TreeBuilder<'a> {
    config:    &'a TraceConfig,
    nodes:     Vec<TraceNode>,
    pub(super) infos: TraceInfoTable,
    windings:  Pool<TraceWinding>,
    triangles: Pool<TraceTriangle>,
    head:      u32,
    skybox:    u32,
    stats:     BuildStats,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(config: &'a TraceConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            infos: TraceInfoTable::default(),
            windings: Pool::new("trace windings"),
            triangles: Pool::new("trace triangles"),
            head: 0,
            skybox: 0,
            stats: BuildStats::default(),
        }
    }

    pub const fn config(&self) -> &TraceConfig {
        self.config
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

    /// Appends an empty leaf. Nodes are never freed.
    pub fn alloc_node(&mut self) -> Result<u32, TraceError> {
        let index = u32::try_from(self.nodes.len())
            .map_err(|_| TraceError::PoolExhausted { pool: "trace nodes" })?;
        self.nodes.push(TraceNode::default());
        Ok(index)
    }

    fn node(
        &self,
        node: u32,
    ) -> Result<&TraceNode, TraceError> {
        self.nodes
            .get(node as usize)
            .ok_or(TraceError::InvalidNode { node: node as i32 })
    }

    /// Copies the compiled partition into the head tree and allocates the skybox tree.
    pub fn mirror_bsp(
        &mut self,
        level: &BspLevel,
    ) -> Result<(), TraceError> {
        self.head = if level.nodes.is_empty() {
            self.alloc_node()?
        } else {
            self.mirror_node(level, BspChild::Node(0))?
        };
        self.skybox = self.alloc_node()?;
        Ok(())
    }

    fn mirror_node(
        &mut self,
        level: &BspLevel,
        child: BspChild,
    ) -> Result<u32, TraceError> {
        let index = self.alloc_node()?;
        match child {
            BspChild::Leaf(leaf) => {
                let leaf = level
                    .leafs
                    .get(leaf)
                    .ok_or(TraceError::InvalidNode { node: -1 - leaf as i32 })?;
                if leaf.is_solid() {
                    self.nodes[index as usize] = TraceNode::SolidLeaf;
                }
            },
            BspChild::Node(num) => {
                let invalid = TraceError::InvalidNode { node: num as i32 };
                let bsp_node = level.nodes.get(num).ok_or(invalid)?;
                let bsp_plane = level
                    .planes
                    .get(bsp_node.plane_num)
                    .ok_or(TraceError::InvalidNode { node: num as i32 })?;
                let plane = TracePlane::new(bsp_plane.normal, bsp_plane.dist);

                let front = self.mirror_node(level, bsp_node.child(0))?;
                let back = self.mirror_node(level, bsp_node.child(1))?;
                self.nodes[index as usize] = TraceNode::decision(plane, [front, back]);
            },
        }
        Ok(index)
    }

    /// Clips `winding` down from `node` and stores the surviving fragments in empty leaves.
    ///
    /// Returns the number of fragments stored.
    pub fn filter_into_nodes(
        &mut self,
        winding: TraceWinding,
        node: u32,
    ) -> Result<usize, TraceError> {
        let Some(plane) = winding.plane() else {
            self.stats.degenerate += 1;
            return Ok(0);
        };
        self.filter_r(winding, &plane, node)
    }

    fn filter_r(
        &mut self,
        winding: TraceWinding,
        winding_plane: &TracePlane,
        node: u32,
    ) -> Result<usize, TraceError> {
        let split = match self.node(node)? {
            TraceNode::Decision {
                plane, children, ..
            } => Some((*plane, *children)),
            TraceNode::EmptyLeaf { .. } => None,
            TraceNode::SolidLeaf => return Ok(0),
        };

        let Some((plane, [front, back])) = split else {
            let handle = self.windings.add(winding)?;
            let is_head = node == self.head || node == self.skybox;
            if let TraceNode::EmptyLeaf { items } = &mut self.nodes[node as usize] {
                items.push(handle, is_head);
            }
            self.stats.windings += 1;
            return Ok(1);
        };

        if winding_plane.matches(&plane, PLANE_MATCH_DOT, PLANE_MATCH_DIST) {
            return self.filter_r(winding, winding_plane, front);
        }
        if winding_plane.matches(&plane.flipped(), PLANE_MATCH_DOT, PLANE_MATCH_DIST) {
            return self.filter_r(winding, winding_plane, back);
        }

        let (front_part, back_part) = winding.clip(&plane)?;
        let mut stored = 0;
        for (part, child) in [(front_part, front), (back_part, back)] {
            if part.is_valid() {
                stored += self.filter_r(part, winding_plane, child)?;
            }
        }
        Ok(stored)
    }

    /// Splits crowded leaves under `node` at the vertex centroid along their longest axis.
    pub fn subdivide(
        &mut self,
        node: u32,
        depth: u32,
    ) -> Result<(), TraceError> {
        let current = self
            .nodes
            .get(node as usize)
            .ok_or(TraceError::InvalidNode { node: node as i32 })?;
        let items = match current {
            TraceNode::Decision { children, .. } => {
                let children = *children;
                for child in children {
                    self.subdivide(child, depth + 1)?;
                }
                return Ok(());
            },
            TraceNode::SolidLeaf => return Ok(()),
            TraceNode::EmptyLeaf { items } => items,
        };
        self.stats.max_depth = self.stats.max_depth.max(depth);

        if depth >= self.config.max_trace_depth {
            return Ok(());
        }

        let mut bounds = BoundingBox::new();
        let mut sum = DVec3::ZERO;
        let mut num_verts = 0usize;
        for winding in items.as_slice().iter().filter_map(|&h| self.windings.get(h)) {
            for v in &winding.verts {
                bounds.grow_to_include_point(v.xyz);
                sum += v.xyz;
            }
            num_verts += winding.verts.len();
        }

        // Every winding fans into verts - 2 triangles
        if num_verts.saturating_sub(2 * items.len()) < self.config.max_node_triangles {
            return Ok(());
        }

        let size = bounds.size();
        let axis = if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        };
        if size[axis] <= self.config.min_node_size {
            return Ok(());
        }

        #[allow(clippy::cast_precision_loss)]
        let average = sum / num_verts as f64;
        let mut dist = average[axis].floor();
        if dist <= bounds.min[axis] || dist >= bounds.max[axis] {
            dist = ((bounds.min[axis] + bounds.max[axis]) * 0.5).floor();
        }

        let mut normal = DVec3::ZERO;
        normal[axis] = 1.0;
        let plane = TracePlane::new(normal, dist);

        let front = self.alloc_node()?;
        let back = self.alloc_node()?;
        let parent_items = match &mut self.nodes[node as usize] {
            TraceNode::EmptyLeaf { items } => items.take(),
            _ => return Ok(()),
        };

        let half = parent_items.len() / 2;
        let mut front_items = Vec::with_capacity(half);
        let mut back_items = Vec::with_capacity(half);
        for handle in parent_items {
            let Some(winding) = self.windings.release(handle) else {
                continue;
            };
            let (front_part, back_part) = winding.clip(&plane)?;
            if front_part.is_valid() {
                front_items.push(self.windings.add(front_part)?);
            }
            if back_part.is_valid() {
                back_items.push(self.windings.add(back_part)?);
            }
        }

        self.nodes[front as usize] = TraceNode::EmptyLeaf {
            items: NodeItems::from(front_items),
        };
        self.nodes[back as usize] = TraceNode::EmptyLeaf {
            items: NodeItems::from(back_items),
        };
        self.nodes[node as usize] = TraceNode::decision(plane, [front, back]);

        self.subdivide(front, depth + 1)?;
        self.subdivide(back, depth + 1)
    }

    /// Replaces every leaf's windings with their fan triangles, returning the triangle count.
    pub fn triangulate(
        &mut self,
        node: u32,
    ) -> Result<usize, TraceError> {
        let windings = match &mut self.nodes[node as usize] {
            TraceNode::Decision { children, .. } => {
                let children = *children;
                let mut count = 0;
                for child in children {
                    count += self.triangulate(child)?;
                }
                return Ok(count);
            },
            TraceNode::SolidLeaf => return Ok(0),
            TraceNode::EmptyLeaf { items } => items.take(),
        };

        let mut triangles = Vec::with_capacity(windings.len());
        for handle in windings {
            let Some(winding) = self.windings.release(handle) else {
                continue;
            };
            for verts in winding.fan() {
                triangles.push(self.triangles.add(TraceTriangle::new(winding.info, verts))?);
            }
        }

        let count = triangles.len();
        self.nodes[node as usize] = TraceNode::EmptyLeaf {
            items: NodeItems::from(triangles),
        };
        Ok(count)
    }

    /// Subdivides unless building lean, then triangulates both trees.
    pub fn finalize(&mut self) -> Result<usize, TraceError> {
        if !self.config.low_memory {
            self.subdivide(self.head, 0)?;
            self.subdivide(self.skybox, 0)?;
        }
        Ok(self.triangulate(self.head)? + self.triangulate(self.skybox)?)
    }

    pub fn finish(
        mut self,
        images: &ImagePool,
    ) -> TraceTree<'_> {
        self.stats.trace_infos = self.infos.len();
        self.stats.triangles = self.triangles.len();
        self.stats.nodes = self.nodes.len();
        self.stats.leaf_nodes = self.nodes.iter().filter(|n| n.is_leaf()).count();

        TraceTree {
            nodes: self.nodes,
            triangles: self.triangles,
            infos: self.infos.into_vec(),
            head: self.head,
            skybox: self.skybox,
            images,
            stats: self.stats,
        }
    }

    pub const fn stats(&self) -> &BuildStats {
        &self.stats
    }

    #[cfg(test)]
    pub(super) fn winding_count(&self) -> usize {
        self.windings.len()
    }

    #[cfg(test)]
    pub(super) fn leaf_windings(
        &self,
        node: u32,
    ) -> Vec<&TraceWinding> {
        self.nodes[node as usize]
            .items()
            .iter()
            .filter_map(|&h| self.windings.get(h))
            .collect()
    }
}
