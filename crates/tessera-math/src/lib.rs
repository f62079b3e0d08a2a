// SPDX-License-Identifier: CEPL-1.0
//! Geometry fed to the renderer: a vertex layout, indexed meshes and the two
//! producers the engine ships with (a flat quad and a procedural sphere).

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::f32::consts::{PI, TAU};
use thiserror::Error;

/// Per-vertex data as laid out in the vertex buffer (binding 0).
///
/// location 0: `pos` as R32G32_SFLOAT, location 1: `color` as R32G32B32_SFLOAT.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(pos: [f32; 2], color: [f32; 3]) -> Self {
        Self { pos, color }
    }
}

/// An indexed triangle list with 16-bit indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("sphere needs at least 3 slices and 2 stacks (got {slices}x{stacks})")]
    TooCoarse { slices: u16, stacks: u16 },

    #[error("sphere lattice of {vertices} vertices does not fit 16-bit indices")]
    TooManyVertices { vertices: usize },
}

impl Mesh {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

const QUAD_VERTS: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0]),
    Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0]),
];
const QUAD_IDXS: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// The default scene: a colored quad, wound clockwise in framebuffer space.
pub fn quad() -> Mesh {
    Mesh {
        vertices: QUAD_VERTS.to_vec(),
        indices: QUAD_IDXS.to_vec(),
    }
}

/// UV sphere of white vertices, projected orthographically onto the XY plane.
///
/// Rows run pole to pole (`stacks + 1` of them), each with `slices + 1`
/// vertices so the seam gets its own column. Triangles facing the viewer are
/// clockwise once Vulkan's downward Y is applied, so back-face culling drops
/// the far hemisphere.
pub fn sphere(radius: f32, slices: u16, stacks: u16) -> Result<Mesh, MeshError> {
    if slices < 3 || stacks < 2 {
        return Err(MeshError::TooCoarse { slices, stacks });
    }

    let row = slices as usize + 1;
    let count = (stacks as usize + 1) * row;
    if count > u16::MAX as usize + 1 {
        return Err(MeshError::TooManyVertices { vertices: count });
    }

    let mut vertices = Vec::with_capacity(count);
    for i in 0..=stacks {
        let phi = f32::from(i) / f32::from(stacks) * PI;
        for j in 0..=slices {
            let theta = f32::from(j) / f32::from(slices) * TAU;
            let p = Vec3::new(theta.cos() * phi.sin(), phi.cos(), theta.sin() * phi.sin()) * radius;
            vertices.push(Vertex::new(Vec2::new(p.x, p.y).to_array(), [1.0, 1.0, 1.0]));
        }
    }

    let mut indices = Vec::with_capacity(stacks as usize * slices as usize * 6);
    for i in 0..stacks as usize {
        for j in 0..slices as usize {
            let a = (i * row + j) as u16;
            let b = a + row as u16;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }

    Ok(Mesh { vertices, indices })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(std::mem::offset_of!(Vertex, color), 8);
    }

    #[test]
    fn quad_matches_builtin_table() {
        let m = quad();
        assert_eq!(m.vertices.len(), 4);
        assert_eq!(m.indices, vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(m.index_count(), 6);
        assert_eq!(m.vertex_bytes().len(), 80);
        assert_eq!(m.index_bytes().len(), 12);
    }

    #[test]
    fn sphere_lattice_shape() {
        let m = sphere(1.0, 8, 4).unwrap();
        assert_eq!(m.vertices.len(), 5 * 9);
        assert_eq!(m.indices.len(), 8 * 4 * 6);
        assert!(m.indices.iter().all(|&i| (i as usize) < m.vertices.len()));
        assert!(m.vertices.iter().all(|v| v.color == [1.0, 1.0, 1.0]));
    }

    #[test]
    fn sphere_poles_sit_on_the_y_axis() {
        let m = sphere(2.0, 6, 3).unwrap();
        let north = m.vertices[0].pos;
        let south = m.vertices.last().unwrap().pos;
        assert!(north[0].abs() < 1e-5 && (north[1] - 2.0).abs() < 1e-5);
        assert!(south[0].abs() < 1e-5 && (south[1] + 2.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_rejects_degenerate_and_oversized_lattices() {
        assert_eq!(
            sphere(1.0, 2, 8),
            Err(MeshError::TooCoarse { slices: 2, stacks: 8 })
        );
        assert!(matches!(
            sphere(1.0, 512, 512),
            Err(MeshError::TooManyVertices { .. })
        ));
    }
}
