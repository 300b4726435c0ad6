// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

use arrayvec::ArrayVec;
use glam::{
    DVec2,
    DVec3,
};

use crate::{
    config::{
        MAX_TW_VERTS,
        WINDING_ON_EPSILON,
    },
    error::TraceError,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TraceVert {
    pub xyz: DVec3,
    pub st:  DVec2,
}

impl TraceVert {
    pub const fn new(
        xyz: DVec3,
        st: DVec2,
    ) -> Self {
        Self { xyz, st }
    }

    #[inline]
    fn lerp(
        &self,
        other: &Self,
        frac: f64,
    ) -> Self {
        Self {
            xyz: self.xyz + (other.xyz - self.xyz) * frac,
            st:  self.st + (other.st - self.st) * frac,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TracePlane {
    pub normal: DVec3,
    pub dist:   f64,
}

impl TracePlane {
    pub const fn new(
        normal: DVec3,
        dist: f64,
    ) -> Self {
        Self { normal, dist }
    }

    /// Plane through three points, `None` when they are collinear.
    pub fn from_points(
        a: DVec3,
        b: DVec3,
        c: DVec3,
    ) -> Option<Self> {
        let normal = (c - a).cross(b - a).try_normalize()?;
        Some(Self {
            normal,
            dist: a.dot(normal),
        })
    }

    #[inline]
    pub fn distance(
        &self,
        point: DVec3,
    ) -> f64 {
        point.dot(self.normal) - self.dist
    }

    #[must_use]
    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            dist:   -self.dist,
        }
    }

    /// Nearly the same orientation and offset as `other`.
    pub fn matches(
        &self,
        other: &Self,
        min_dot: f64,
        max_dist: f64,
    ) -> bool {
        self.normal.dot(other.normal) > min_dot && (self.dist - other.dist).abs() < max_dist
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Front,
    Back,
    On,
}

/// Convex polygon carried down the tree during construction.
#[derive(Clone, Debug)]
pub struct TraceWinding {
    pub info:  u32,
    pub verts: ArrayVec<TraceVert, MAX_TW_VERTS>,
}

impl TraceWinding {
    pub fn triangle(
        info: u32,
        verts: [TraceVert; 3],
    ) -> Self {
        Self {
            info,
            verts: ArrayVec::from_iter(verts),
        }
    }

    fn empty(info: u32) -> Self {
        Self {
            info,
            verts: ArrayVec::new(),
        }
    }

    pub fn plane(&self) -> Option<TracePlane> {
        match self.verts.as_slice() {
            [a, b, c, ..] => TracePlane::from_points(a.xyz, b.xyz, c.xyz),
            _ => None,
        }
    }

    /// A fragment that can still be triangulated.
    pub fn is_valid(&self) -> bool {
        self.verts.len() >= 3
    }

    /// Splits the winding by `plane` into front and back parts.
    ///
    /// Points within `WINDING_ON_EPSILON` of the plane go to both parts. A winding with no
    /// point behind the plane is returned whole as the front part, and vice versa. Either
    /// part may come back with fewer than three verts.
    pub fn clip(
        &self,
        plane: &TracePlane,
    ) -> Result<(Self, Self), TraceError> {
        let overflow = |_| TraceError::WindingOverflow {
            limit: MAX_TW_VERTS,
        };

        let mut dists = [0.0; MAX_TW_VERTS];
        let mut sides = [Side::On; MAX_TW_VERTS];
        let mut counts = [0usize; 3];
        for (i, v) in self.verts.iter().enumerate() {
            dists[i] = plane.distance(v.xyz);
            sides[i] = if dists[i] < -WINDING_ON_EPSILON {
                Side::Back
            } else if dists[i] > WINDING_ON_EPSILON {
                Side::Front
            } else {
                Side::On
            };
            counts[sides[i] as usize] += 1;
        }

        if counts[Side::Back as usize] == 0 {
            return Ok((self.clone(), Self::empty(self.info)));
        }
        if counts[Side::Front as usize] == 0 {
            return Ok((Self::empty(self.info), self.clone()));
        }

        let mut front = Self::empty(self.info);
        let mut back = Self::empty(self.info);
        let n = self.verts.len();
        for i in 0..n {
            let j = (i + 1) % n;
            let a = &self.verts[i];
            let b = &self.verts[j];

            match sides[i] {
                Side::Front => front.verts.try_push(*a).map_err(overflow)?,
                Side::Back => back.verts.try_push(*a).map_err(overflow)?,
                Side::On => {
                    front.verts.try_push(*a).map_err(overflow)?;
                    back.verts.try_push(*a).map_err(overflow)?;
                    continue;
                },
            }

            if sides[j] == Side::On || sides[j] == sides[i] {
                continue;
            }

            let frac = dists[i] / (dists[i] - dists[j]);
            let mut mid = a.lerp(b, frac);
            // Snap to axial planes exactly
            for k in 0..3 {
                if plane.normal[k] == 1.0 {
                    mid.xyz[k] = plane.dist;
                } else if plane.normal[k] == -1.0 {
                    mid.xyz[k] = -plane.dist;
                }
            }

            front.verts.try_push(mid).map_err(overflow)?;
            back.verts.try_push(mid).map_err(overflow)?;
        }

        Ok((front, back))
    }

    /// Fan triangles around vertex 0.
    pub fn fan(&self) -> impl Iterator<Item = [TraceVert; 3]> + '_ {
        let first = self.verts.first().copied().unwrap_or_default();
        self.verts
            .get(1..)
            .unwrap_or_default()
            .windows(2)
            .map(move |pair| [first, pair[0], pair[1]])
    }

    /// Polygon area from the vector shoelace formula.
    pub fn area(&self) -> f64 {
        let n = self.verts.len();
        let sum: DVec3 = (0..n)
            .map(|i| self.verts[i].xyz.cross(self.verts[(i + 1) % n].xyz))
            .sum();
        sum.length() * 0.5
    }
}

/// A query-time triangle with its edges from vertex 0 precomputed.
#[derive(Clone, Copy, Debug)]
pub struct TraceTriangle {
    pub v:     [TraceVert; 3],
    pub edge1: DVec3,
    pub edge2: DVec3,
    pub info:  u32,
}

impl TraceTriangle {
    pub fn new(
        info: u32,
        v: [TraceVert; 3],
    ) -> Self {
        Self {
            v,
            edge1: v[1].xyz - v[0].xyz,
            edge2: v[2].xyz - v[0].xyz,
            info,
        }
    }

    pub fn area(&self) -> f64 {
        self.edge1.cross(self.edge2).length() * 0.5
    }
}
