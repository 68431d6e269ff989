//! The GPU contract.
//!
//! The renderer only needs texture allocation, two upload shapes, uniform
//! binding, and two draw primitives; everything else (context creation,
//! shader compilation, projection) belongs to the embedding application.
//! All calls happen on the main thread.

use std::collections::HashSet;

/// Opaque GPU texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// An RGBA tint. Opacity rides on the alpha byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::from_rgb(0xff, 0xff, 0xff);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xff }
    }

    pub const fn with_alpha(mut self, a: u8) -> Self {
        self.a = a;
        self
    }

    pub fn alpha_f32(&self) -> f32 {
        self.a as f32 / 255.0
    }
}

/// Uniforms shared by the peak shaders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShaderUniforms {
    pub colour: Rgba,
    pub top: f32,
    pub bottom: f32,
    pub n_channels: u16,
    pub peaks_per_pixel: f32,
    pub v_gain: f32,
    pub mip_level: u32,
}

/// One textured quad. Texture coordinates cover the horizontal extent only;
/// vertically the full texture is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexturedQuad {
    pub texture: TextureId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub tex_left: f32,
    pub tex_right: f32,
    pub colour: Rgba,
}

pub trait Gpu {
    fn gen_textures(&mut self, count: usize) -> Vec<TextureId>;
    fn delete_textures(&mut self, ids: &[TextureId]);
    /// Upload a one-dimensional 8-bit texture.
    fn upload_1d(&mut self, id: TextureId, data: &[u8]);
    /// Upload a two-dimensional 8-bit (alpha) texture, row-major.
    fn upload_2d(&mut self, id: TextureId, width: usize, height: usize, data: &[u8]);
    fn set_uniforms(&mut self, uniforms: &ShaderUniforms);
    fn draw_quad(&mut self, quad: &TexturedQuad);
    /// Draw a connected line strip, used at sample-level zoom.
    fn draw_lines(&mut self, points: &[(f32, f32)], colour: Rgba);
}

/// Records every call; stands in for a real context in tests.
#[derive(Default)]
pub struct RecordingGpu {
    next_id: u32,
    pub live: HashSet<TextureId>,
    pub uploads_1d: usize,
    pub uploads_2d: usize,
    pub quads: Vec<TexturedQuad>,
    pub line_strips: usize,
    pub uniform_sets: Vec<ShaderUniforms>,
}

impl RecordingGpu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Gpu for RecordingGpu {
    fn gen_textures(&mut self, count: usize) -> Vec<TextureId> {
        (0..count)
            .map(|_| {
                self.next_id += 1;
                let id = TextureId(self.next_id);
                self.live.insert(id);
                id
            })
            .collect()
    }

    fn delete_textures(&mut self, ids: &[TextureId]) {
        for id in ids {
            self.live.remove(id);
        }
    }

    fn upload_1d(&mut self, _id: TextureId, _data: &[u8]) {
        self.uploads_1d += 1;
    }

    fn upload_2d(&mut self, _id: TextureId, _width: usize, _height: usize, _data: &[u8]) {
        self.uploads_2d += 1;
    }

    fn set_uniforms(&mut self, uniforms: &ShaderUniforms) {
        self.uniform_sets.push(*uniforms);
    }

    fn draw_quad(&mut self, quad: &TexturedQuad) {
        self.quads.push(*quad);
    }

    fn draw_lines(&mut self, _points: &[(f32, f32)], _colour: Rgba) {
        self.line_strips += 1;
    }
}
