// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use glam::DVec3;

use super::winding::TracePlane;
use crate::config::GROW_NODE_ITEMS;

/// Axis classification of a splitting plane, used to skip the dot product during traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneType {
    X,
    Y,
    Z,
    NonAxial,
}

impl PlaneType {
    pub fn for_normal(normal: DVec3) -> Self {
        if normal.x == 1.0 || normal.x == -1.0 {
            Self::X
        } else if normal.y == 1.0 || normal.y == -1.0 {
            Self::Y
        } else if normal.z == 1.0 || normal.z == -1.0 {
            Self::Z
        } else {
            Self::NonAxial
        }
    }

    /// Signed distance of `point` from `plane`, exploiting axial normals.
    #[inline]
    pub fn distance(
        self,
        plane: &TracePlane,
        point: DVec3,
    ) -> f64 {
        match self {
            Self::X => point.x * plane.normal.x - plane.dist,
            Self::Y => point.y * plane.normal.y - plane.dist,
            Self::Z => point.z * plane.normal.z - plane.dist,
            Self::NonAxial => plane.distance(point),
        }
    }
}

/// Item handles stored in a leaf.
///
/// Windings while the tree is being built, triangles once it has been triangulated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeItems {
    items: Vec<u32>,
}

impl NodeItems {
    /// Appends `item`, growing by a fixed step or doubling for the head node.
    pub fn push(
        &mut self,
        item: u32,
        is_head: bool,
    ) {
        if self.items.len() == self.items.capacity() {
            let grow = if is_head {
                self.items.capacity().max(GROW_NODE_ITEMS)
            } else {
                GROW_NODE_ITEMS
            };
            self.items.reserve_exact(grow);
        }
        self.items.push(item);
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn take(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.items)
    }
}

impl From<Vec<u32>> for NodeItems {
    fn from(items: Vec<u32>) -> Self {
        Self { items }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TraceNode {
    /// Children are indexed front (0) then back (1).
    Decision {
        plane:      TracePlane,
        plane_type: PlaneType,
        children:   [u32; 2],
    },
    EmptyLeaf {
        items: NodeItems,
    },
    /// Inside solid space, any segment reaching it is blocked.
    SolidLeaf,
}

impl Default for TraceNode {
    fn default() -> Self {
        Self::EmptyLeaf {
            items: NodeItems::default(),
        }
    }
}

impl TraceNode {
    pub fn decision(
        plane: TracePlane,
        children: [u32; 2],
    ) -> Self {
        Self::Decision {
            plane,
            plane_type: PlaneType::for_normal(plane.normal),
            children,
        }
    }

    pub const fn is_leaf(&self) -> bool {
        !matches!(self, Self::Decision { .. })
    }

    /// Items of an empty leaf, nothing for any other node.
    pub fn items(&self) -> &[u32] {
        match self {
            Self::EmptyLeaf { items } => items.as_slice(),
            _ => &[],
        }
    }
}
