//! Resource management
//!
//! Meshes, materials and textures are registered with [`Assets`] and addressed
//! by generational ids. GPU copies are created by [`Assets::upload`] and kept
//! alongside the CPU data.

mod material;
mod mesh;
mod texture;

pub use material::*;
pub use mesh::*;
pub use texture::*;

use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::{GpuProgram, ParameterValue};

new_key_type! {
    pub struct MeshId;
    pub struct MaterialId;
    pub struct TextureId;
}

/// Store of every mesh, material and texture the scene can reference
#[derive(Default)]
pub struct Assets {
    meshes: SlotMap<MeshId, Mesh>,
    materials: SlotMap<MaterialId, Material>,
    textures: SlotMap<TextureId, TextureData>,
    gpu_meshes: SecondaryMap<MeshId, GpuMesh>,
    gpu_textures: SecondaryMap<TextureId, GpuTexture>,
    white: Option<GpuTexture>,
    sampler: Option<SamplerHandle>,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.insert(mesh)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.insert(material)
    }

    pub fn add_texture(&mut self, texture: TextureData) -> TextureId {
        self.textures.insert(texture)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn texture(&self, id: TextureId) -> Option<&TextureData> {
        self.textures.get(id)
    }

    pub fn gpu_mesh(&self, id: MeshId) -> Option<&GpuMesh> {
        self.gpu_meshes.get(id)
    }

    /// Upload every mesh and texture that has no GPU copy yet
    pub fn upload<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> BackendResult<()> {
        if self.sampler.is_none() {
            self.sampler = Some(backend.create_sampler(&SamplerDescriptor::material())?);
        }
        if self.white.is_none() {
            self.white = Some(GpuTexture::upload(backend, &TextureData::white())?);
        }

        let mut uploaded = 0;
        for (id, mesh) in &self.meshes {
            if !self.gpu_meshes.contains_key(id) {
                self.gpu_meshes.insert(id, GpuMesh::upload(backend, mesh)?);
                uploaded += 1;
            }
        }
        for (id, texture) in &self.textures {
            if !self.gpu_textures.contains_key(id) {
                self.gpu_textures.insert(id, GpuTexture::upload(backend, texture)?);
                uploaded += 1;
            }
        }
        if uploaded > 0 {
            log::info!("Uploaded {} assets", uploaded);
        }
        Ok(())
    }

    /// Texture binding for a program parameter, if the texture is on the GPU
    pub fn texture_binding(&self, id: TextureId) -> Option<ParameterValue> {
        Some(ParameterValue::Texture {
            view: self.gpu_textures.get(id)?.view,
            sampler: self.sampler?,
        })
    }

    /// Set the material's `mat_` parameters on `program`
    pub fn bind_material<B: GraphicsBackend + ?Sized>(
        &self,
        id: MaterialId,
        program: &mut GpuProgram,
        backend: &mut B,
    ) -> bool {
        let Some(material) = self.materials.get(id) else {
            log::warn!("Unknown material {:?}", id);
            return false;
        };

        // Program state persists between draws, so untextured materials rebind white
        if material.get(DIFFUSE_TEXTURE).is_none() {
            if let (Some(white), Some(sampler)) = (self.white, self.sampler) {
                program.set_parameter(
                    backend,
                    DIFFUSE_TEXTURE,
                    ParameterValue::Texture {
                        view: white.view,
                        sampler,
                    },
                );
            }
        }
        for (name, value) in material.bound_params() {
            let value = match *value {
                MaterialValue::Float(v) => ParameterValue::Float(v),
                MaterialValue::Vec2(v) => ParameterValue::Vec2(v),
                MaterialValue::Vec3(v) => ParameterValue::Vec3(v),
                MaterialValue::Vec4(v) => ParameterValue::Vec4(v),
                MaterialValue::Texture(texture) => match self.texture_binding(texture) {
                    Some(binding) => binding,
                    None => {
                        log::debug!("Material '{}': texture {:?} not uploaded", material.name, texture);
                        continue;
                    }
                },
            };
            program.set_parameter(backend, name, value);
        }
        true
    }

    /// Release all GPU copies
    pub fn release<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for (_, mesh) in self.gpu_meshes.drain() {
            mesh.destroy(backend);
        }
        for (_, texture) in self.gpu_textures.drain() {
            texture.destroy(backend);
        }
        if let Some(white) = self.white.take() {
            white.destroy(backend);
        }
        self.sampler = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingBackend;

    #[test]
    fn test_upload_is_incremental() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut assets = Assets::new();
        let cube = assets.add_mesh(Mesh::cube());
        assets.add_texture(TextureData::white());

        assets.upload(&mut backend).unwrap();
        assert_eq!(assets.gpu_mesh(cube).unwrap().index_count, 36);
        let buffers = backend.live_buffers();

        assets.upload(&mut backend).unwrap();
        assert_eq!(backend.live_buffers(), buffers);

        let plane = assets.add_mesh(Mesh::plane(1.0, 1.0));
        assets.upload(&mut backend).unwrap();
        assert!(assets.gpu_mesh(plane).is_some());
        assert_eq!(backend.live_buffers(), buffers + 2);

        assets.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_texture_binding_requires_upload() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut assets = Assets::new();
        let texture = assets.add_texture(TextureData::white());
        assert!(assets.texture_binding(texture).is_none());
        assets.upload(&mut backend).unwrap();
        assert!(matches!(
            assets.texture_binding(texture),
            Some(ParameterValue::Texture { .. })
        ));
    }
}
