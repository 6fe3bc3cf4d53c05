//! Triangle mesh input.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, SlicerError};

/// An indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Flat array of vertex positions: `[x0, y0, z0, x1, y1, z1, ...]` (f32).
    pub vertices: Vec<f32>,
    /// Flat array of triangle indices: `[i0, i1, i2, ...]` (u32).
    pub indices: Vec<u32>,
    /// Flat array of face normals: `[nx0, ny0, nz0, ...]`, one per triangle.
    /// May be empty, in which case normals are derived from the winding.
    pub normals: Vec<f32>,
}

impl TriangleMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Read an ASCII or binary STL file.
    pub fn load_stl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let mesh = Self::from_stl_reader(&mut reader)?;
        debug!(
            path = %path.display(),
            triangles = mesh.num_triangles(),
            vertices = mesh.num_vertices(),
            "loaded STL"
        );
        Ok(mesh)
    }

    /// Read an ASCII or binary STL stream.
    pub fn from_stl_reader<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let stl = stl_io::read_stl(reader)?;

        let mut mesh = TriangleMesh {
            vertices: Vec::with_capacity(stl.vertices.len() * 3),
            indices: Vec::with_capacity(stl.faces.len() * 3),
            normals: Vec::with_capacity(stl.faces.len() * 3),
        };
        for v in &stl.vertices {
            mesh.vertices.extend_from_slice(&[v[0], v[1], v[2]]);
        }
        for face in &stl.faces {
            for &index in &face.vertices {
                let index = u32::try_from(index)
                    .ok()
                    .filter(|&i| (i as usize) < stl.vertices.len())
                    .ok_or_else(|| {
                        SlicerError::DegenerateMesh(format!("face references vertex {index}"))
                    })?;
                mesh.indices.push(index);
            }
            mesh.normals
                .extend_from_slice(&[face.normal[0], face.normal[1], face.normal[2]]);
        }

        if mesh.indices.is_empty() {
            return Err(SlicerError::EmptyMesh);
        }
        Ok(mesh)
    }
}
