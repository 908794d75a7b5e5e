use crate::draw_list::{DrawItem, SceneLight};
use crate::material::ShaderInputs;
use crate::skin::JointTexture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("shader compile/link failed: {0}")]
    Compile(String),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("unsupported image format{}", .0.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    UnsupportedFormat(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// The graphics-API seam. The engine never talks to a GPU directly; it
/// emits compiled-program requests, uniform uploads and ordered draws
/// through this trait. Failures are per-unit: a draw whose program failed
/// to compile is skipped, the frame goes on.
pub trait GpuBackend {
    fn compile_and_link(
        &mut self,
        vertex_source: &str,
        fragment_source: &str,
        defines: &[String],
    ) -> Result<ProgramHandle, BackendError>;
    fn upload_uniforms(&mut self, program: ProgramHandle, inputs: &ShaderInputs);
    /// Punctual lights applying to the next draws.
    fn set_lights(&mut self, lights: &[&SceneLight]);
    /// Current morph-target weights for one mesh.
    fn set_morph_weights(&mut self, mesh: usize, weights: &[f32]);
    fn upload_joint_texture(&mut self, node: usize, texture: &JointTexture);
    fn bind_texture(&mut self, program: ProgramHandle, name: &str, texture: usize);
    /// Offscreen color+depth target for the transmission capture pass.
    fn begin_offscreen_pass(&mut self);
    fn generate_mipmaps(&mut self);
    fn begin_main_pass(&mut self);
    fn draw(&mut self, program: ProgramHandle, item: &DrawItem);
    fn end_frame(&mut self);
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8.
    pub pixels: Vec<u8>,
}

/// Image codec seam; PNG/JPEG ship built in, anything else is a caller-
/// supplied implementation.
pub trait ImageDecoder {
    fn decode(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<DecodedImage, BackendError>;
}

/// Decoder backed by the `image` crate (PNG + JPEG).
#[derive(Debug, Clone, Copy, Default)]
pub struct StdImageDecoder;

impl ImageDecoder for StdImageDecoder {
    fn decode(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<DecodedImage, BackendError> {
        if let Some(mime) = mime_type
            && !matches!(mime, "image/png" | "image/jpeg")
        {
            return Err(BackendError::UnsupportedFormat(Some(mime.to_string())));
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let rgba = decoded.to_rgba8();
        Ok(DecodedImage {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }
}

/// Test and headless-inspection backend: records every call as one line so
/// frame submission order and compile counts can be asserted.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub calls: Vec<String>,
    pub compiles: usize,
    /// Define names that should fail compilation, for error-path tests.
    pub fail_defines: Vec<String>,
    next_program: u32,
}

impl GpuBackend for RecordingBackend {
    fn compile_and_link(
        &mut self,
        _vertex_source: &str,
        _fragment_source: &str,
        defines: &[String],
    ) -> Result<ProgramHandle, BackendError> {
        if let Some(bad) = defines.iter().find(|d| self.fail_defines.contains(d)) {
            self.calls.push(format!("compile-error {bad}"));
            return Err(BackendError::Compile(bad.clone()));
        }
        self.compiles += 1;
        let handle = ProgramHandle(self.next_program);
        self.next_program += 1;
        self.calls.push(format!("compile #{} [{}]", handle.0, defines.join(",")));
        Ok(handle)
    }

    fn upload_uniforms(&mut self, program: ProgramHandle, inputs: &ShaderInputs) {
        self.calls
            .push(format!("uniforms #{} ({})", program.0, inputs.properties.len()));
    }

    fn set_lights(&mut self, lights: &[&SceneLight]) {
        self.calls.push(format!("lights {}", lights.len()));
    }

    fn set_morph_weights(&mut self, mesh: usize, weights: &[f32]) {
        let joined = weights
            .iter()
            .map(|w| format!("{w}"))
            .collect::<Vec<_>>()
            .join(",");
        self.calls.push(format!("weights mesh={mesh} [{joined}]"));
    }

    fn upload_joint_texture(&mut self, node: usize, texture: &JointTexture) {
        self.calls.push(format!(
            "joints node={node} {}x{}",
            texture.width, texture.height
        ));
    }

    fn bind_texture(&mut self, program: ProgramHandle, name: &str, texture: usize) {
        self.calls
            .push(format!("bind #{} {name}={texture}", program.0));
    }

    fn begin_offscreen_pass(&mut self) {
        self.calls.push("offscreen-pass".into());
    }

    fn generate_mipmaps(&mut self) {
        self.calls.push("mipmaps".into());
    }

    fn begin_main_pass(&mut self) {
        self.calls.push("main-pass".into());
    }

    fn draw(&mut self, program: ProgramHandle, item: &DrawItem) {
        self.calls.push(format!(
            "draw #{} node={} prim={}",
            program.0, item.node, item.primitive
        ));
    }

    fn end_frame(&mut self) {
        self.calls.push("end-frame".into());
    }
}
