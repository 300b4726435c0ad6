// Copyright (C) 2024 GLStudios
// SPDX-License-Identifier: LGPL-2.1-only

//! Quadratic Bezier patch meshes, tessellated for shadow casting.

use crate::{
    bsp::DrawVert,
    config::MAX_EXPANDED_AXIS,
};

/// Columns or rows whose midpoints deviate less than this from a straight line are dropped.
const LINEAR_EPSILON: f64 = 0.1;

/// A row-major grid of verts, `width` columns by `height` rows.
#[derive(Clone, Debug)]
pub struct Mesh {
    width:  usize,
    height: usize,
    verts:  Vec<DrawVert>,
}

impl Mesh {
    /// Returns `None` unless `verts` covers the grid exactly.
    pub fn new(
        width: usize,
        height: usize,
        verts: Vec<DrawVert>,
    ) -> Option<Self> {
        (width > 0 && height > 0 && verts.len() == width * height).then_some(Self {
            width,
            height,
            verts,
        })
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub const fn height(&self) -> usize {
        self.height
    }

    pub fn verts(&self) -> &[DrawVert] {
        &self.verts
    }

    #[inline]
    fn at(
        &self,
        x: usize,
        y: usize,
    ) -> DrawVert {
        self.verts[y * self.width + x]
    }

    fn rows(&self) -> Vec<Vec<DrawVert>> {
        self.verts.chunks(self.width).map(<[DrawVert]>::to_vec).collect()
    }

    fn from_rows(rows: Vec<Vec<DrawVert>>) -> Self {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        Self {
            width,
            height,
            verts: rows.into_iter().flatten().collect(),
        }
    }

    /// Splits every control span in both directions `iterations` times.
    ///
    /// Each pass replaces a control triple `a b c` with `a ab mid bc c` where `mid` lies on
    /// the curve. Growth stops silently once an axis would reach `MAX_EXPANDED_AXIS`.
    #[must_use]
    pub fn subdivide(
        &self,
        iterations: u32,
    ) -> Self {
        let mut rows = self.rows();
        let mut width = self.width;
        let mut height = self.height;

        for _ in 0..iterations {
            let mut j = 0;
            while j + 2 < width {
                if width + 2 >= MAX_EXPANDED_AXIS {
                    break;
                }
                width += 2;
                for row in &mut rows {
                    let prev = row[j].lerp_half(&row[j + 1]);
                    let next = row[j + 1].lerp_half(&row[j + 2]);
                    let mid = prev.lerp_half(&next);
                    row.splice(j + 1..j + 2, [prev, mid, next]);
                }
                j += 4;
            }

            let mut j = 0;
            while j + 2 < height {
                if height + 2 >= MAX_EXPANDED_AXIS {
                    break;
                }
                height += 2;
                let (prev, mid, next): (Vec<_>, Vec<_>, Vec<_>) = (0..width)
                    .map(|i| {
                        let prev = rows[j][i].lerp_half(&rows[j + 1][i]);
                        let next = rows[j + 1][i].lerp_half(&rows[j + 2][i]);
                        (prev, prev.lerp_half(&next), next)
                    })
                    .fold(Default::default(), |(mut p, mut m, mut n), (a, b, c)| {
                        p.push(a);
                        m.push(b);
                        n.push(c);
                        (p, m, n)
                    });
                rows.splice(j + 1..j + 2, [prev, mid, next]);
                j += 4;
            }
        }

        Self::from_rows(rows)
    }

    /// Moves every approximating (odd) point onto the curve.
    pub fn put_on_curve(&mut self) {
        for i in 0..self.width {
            for j in (1..self.height.saturating_sub(1)).step_by(2) {
                let prev = self.at(i, j).lerp_half(&self.at(i, j + 1));
                let next = self.at(i, j).lerp_half(&self.at(i, j - 1));
                self.verts[j * self.width + i] = prev.lerp_half(&next);
            }
        }

        for j in 0..self.height {
            for i in (1..self.width.saturating_sub(1)).step_by(2) {
                let prev = self.at(i, j).lerp_half(&self.at(i + 1, j));
                let next = self.at(i, j).lerp_half(&self.at(i - 1, j));
                self.verts[j * self.width + i] = prev.lerp_half(&next);
            }
        }
    }

    /// Drops interior columns and rows that are collinear with their neighbours.
    #[must_use]
    pub fn remove_linear_columns_rows(&self) -> Self {
        let mut rows = self.rows();

        let mut j = 1;
        while j + 1 < rows[0].len() {
            let deviation = rows
                .iter()
                .map(|row| off_line(&row[j], &row[j - 1], &row[j + 1]))
                .fold(0.0, f64::max);
            if deviation < LINEAR_EPSILON {
                for row in &mut rows {
                    row.remove(j);
                }
            } else {
                j += 1;
            }
        }

        let mut j = 1;
        while j + 1 < rows.len() {
            let deviation = (0..rows[j].len())
                .map(|i| off_line(&rows[j][i], &rows[j - 1][i], &rows[j + 1][i]))
                .fold(0.0, f64::max);
            if deviation < LINEAR_EPSILON {
                rows.remove(j);
            } else {
                j += 1;
            }
        }

        Self::from_rows(rows)
    }

    /// Two triangles per cell, the diagonal alternating with cell parity.
    pub fn triangles(&self) -> impl Iterator<Item = [DrawVert; 3]> + '_ {
        let cells_x = self.width.saturating_sub(1);
        let cells_y = self.height.saturating_sub(1);
        (0..cells_y)
            .flat_map(move |y| (0..cells_x).map(move |x| (x, y)))
            .flat_map(move |(x, y)| {
                let pw = [
                    self.at(x, y),
                    self.at(x, y + 1),
                    self.at(x + 1, y + 1),
                    self.at(x + 1, y),
                    self.at(x, y),
                ];
                let r = (x + y) & 1;
                [
                    [pw[r], pw[r + 1], pw[r + 2]],
                    [pw[r], pw[r + 2], pw[r + 3]],
                ]
            })
    }
}

/// Distance of `point` from the line through `start` and `end`.
fn off_line(
    point: &DrawVert,
    start: &DrawVert,
    end: &DrawVert,
) -> f64 {
    let dir = (end.xyz - start.xyz).normalize_or_zero();
    let proj = start.xyz + dir * (point.xyz - start.xyz).dot(dir);
    (point.xyz - proj).length()
}
