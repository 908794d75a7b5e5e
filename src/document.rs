use crate::accessor::{Accessor, Buffer, BufferView};
use crate::animation::Animation;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::node::{CameraPose, Node, Scene};
use crate::skin::Skin;
use glam::{Mat4, Vec3};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct Image {
    pub name: String,
    pub uri: Option<String>,
    pub buffer_view: Option<usize>,
    pub mime_type: Option<String>,
    /// Filled after the decode service ran; absent when decoding failed or
    /// was skipped.
    pub size: Option<(u32, u32)>,
}

impl Image {
    pub fn from_json(v: &Value) -> Self {
        Self {
            name: str_field(v, "name"),
            uri: v.get("uri").and_then(|x| x.as_str()).map(str::to_string),
            buffer_view: index(v, "bufferView"),
            mime_type: v
                .get("mimeType")
                .and_then(|x| x.as_str())
                .map(str::to_string),
            size: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Texture {
    pub name: String,
    pub source: Option<usize>,
    pub sampler: Option<usize>,
}

impl Texture {
    pub fn from_json(v: &Value) -> Self {
        // KHR_texture_basisu moves the source under its extension block.
        let basisu_source = v
            .get("extensions")
            .and_then(|e| e.get("KHR_texture_basisu"))
            .and_then(|e| index(e, "source"));
        Self {
            name: str_field(v, "name"),
            source: basisu_source.or_else(|| index(v, "source")),
            sampler: index(v, "sampler"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    pub name: String,
    pub mag_filter: Option<u32>,
    pub min_filter: Option<u32>,
    pub wrap_s: u32,
    pub wrap_t: u32,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            name: String::new(),
            mag_filter: None,
            min_filter: None,
            wrap_s: 10497,
            wrap_t: 10497,
        }
    }
}

impl Sampler {
    pub fn from_json(v: &Value) -> Self {
        Self {
            name: str_field(v, "name"),
            mag_filter: v.get("magFilter").and_then(|x| x.as_u64()).map(|x| x as u32),
            min_filter: v.get("minFilter").and_then(|x| x.as_u64()).map(|x| x as u32),
            wrap_s: v
                .get("wrapS")
                .and_then(|x| x.as_u64())
                .unwrap_or(10497) as u32,
            wrap_t: v
                .get("wrapT")
                .and_then(|x| x.as_u64())
                .unwrap_or(10497) as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CameraProjection {
    Perspective {
        yfov: f32,
        aspect: Option<f32>,
        znear: f32,
        zfar: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        znear: f32,
        zfar: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    pub projection: CameraProjection,
}

impl Camera {
    pub fn from_json(v: &Value) -> Self {
        let projection = match v.get("type").and_then(|x| x.as_str()) {
            Some("orthographic") => {
                let o = v.get("orthographic").cloned().unwrap_or(Value::Null);
                CameraProjection::Orthographic {
                    xmag: f32_field(&o, "xmag", 1.0),
                    ymag: f32_field(&o, "ymag", 1.0),
                    znear: f32_field(&o, "znear", 0.01),
                    zfar: f32_field(&o, "zfar", 100.0),
                }
            }
            _ => {
                let p = v.get("perspective").cloned().unwrap_or(Value::Null);
                CameraProjection::Perspective {
                    yfov: f32_field(&p, "yfov", std::f32::consts::FRAC_PI_4),
                    aspect: p.get("aspectRatio").and_then(|x| x.as_f64()).map(|x| x as f32),
                    znear: f32_field(&p, "znear", 0.01),
                    zfar: p.get("zfar").and_then(|x| x.as_f64()).map(|x| x as f32),
                }
            }
        };
        Self {
            name: str_field(v, "name"),
            projection,
        }
    }

    pub fn projection_matrix(&self, viewport_aspect: f32) -> Mat4 {
        match self.projection {
            CameraProjection::Perspective {
                yfov,
                aspect,
                znear,
                zfar,
            } => {
                let aspect = aspect.unwrap_or(viewport_aspect);
                match zfar {
                    Some(zfar) => Mat4::perspective_rh_gl(yfov, aspect, znear, zfar),
                    None => Mat4::perspective_infinite_rh(yfov, aspect, znear),
                }
            }
            CameraProjection::Orthographic {
                xmag,
                ymag,
                znear,
                zfar,
            } => Mat4::orthographic_rh_gl(-xmag, xmag, -ymag, ymag, znear, zfar),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// KHR_lights_punctual light definition; nodes reference these by index.
#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub range: Option<f32>,
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
}

impl Light {
    pub fn from_json(v: &Value) -> Self {
        let kind = match v.get("type").and_then(|x| x.as_str()) {
            Some("point") => LightKind::Point,
            Some("spot") => LightKind::Spot,
            _ => LightKind::Directional,
        };
        let spot = v.get("spot").cloned().unwrap_or(Value::Null);
        let color = v
            .get("color")
            .and_then(|c| c.as_array())
            .map(|arr| {
                let f: Vec<f32> = arr
                    .iter()
                    .filter_map(|n| n.as_f64())
                    .map(|n| n as f32)
                    .collect();
                if f.len() >= 3 {
                    Vec3::new(f[0], f[1], f[2])
                } else {
                    Vec3::ONE
                }
            })
            .unwrap_or(Vec3::ONE);
        Self {
            name: str_field(v, "name"),
            kind,
            color,
            intensity: f32_field(v, "intensity", 1.0),
            range: v.get("range").and_then(|x| x.as_f64()).map(|x| x as f32),
            inner_cone_angle: f32_field(&spot, "innerConeAngle", 0.0),
            outer_cone_angle: f32_field(&spot, "outerConeAngle", std::f32::consts::FRAC_PI_4),
        }
    }
}

/// Filtered environment map reference (EXT_lights_image_based shape,
/// consumed as an opaque identifier by this core).
#[derive(Debug, Clone)]
pub struct ImageBasedLight {
    pub name: String,
    pub intensity: f32,
    pub rotation: [f32; 4],
}

impl ImageBasedLight {
    pub fn from_json(v: &Value) -> Self {
        let rotation = v
            .get("rotation")
            .and_then(|r| r.as_array())
            .map(|arr| {
                let f: Vec<f32> = arr
                    .iter()
                    .filter_map(|n| n.as_f64())
                    .map(|n| n as f32)
                    .collect();
                if f.len() >= 4 {
                    [f[0], f[1], f[2], f[3]]
                } else {
                    [0.0, 0.0, 0.0, 1.0]
                }
            })
            .unwrap_or([0.0, 0.0, 0.0, 1.0]);
        Self {
            name: str_field(v, "name"),
            intensity: f32_field(v, "intensity", 1.0),
            rotation,
        }
    }
}

/// The root aggregate. Owns every entity list; all cross-references are
/// indices into these lists. After load the reserved default material and
/// sampler sit at `default_material` / `default_sampler`.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub asset_version: String,
    pub asset_generator: String,
    pub accessors: Vec<Accessor>,
    pub buffers: Vec<Buffer>,
    pub buffer_views: Vec<BufferView>,
    pub images: Vec<Image>,
    pub textures: Vec<Texture>,
    pub samplers: Vec<Sampler>,
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub nodes: Vec<Node>,
    pub scenes: Vec<Scene>,
    pub cameras: Vec<Camera>,
    pub lights: Vec<Light>,
    pub image_based_lights: Vec<ImageBasedLight>,
    pub skins: Vec<Skin>,
    pub animations: Vec<Animation>,
    /// Material-variant names, deduplicated at load time.
    pub variants: Vec<String>,
    pub scene: Option<usize>,
    pub default_material: usize,
    pub default_sampler: usize,
    /// For each animation, the set of animations it can safely play with.
    pub disjoint_animations: Vec<Vec<usize>>,
    pub warnings: Vec<String>,
}

impl Document {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        eprintln!("[warn] {message}");
        self.warnings.push(message);
    }

    pub fn default_scene(&self) -> Option<&Scene> {
        self.scene
            .or(if self.scenes.is_empty() { None } else { Some(0) })
            .and_then(|i| self.scenes.get(i))
    }

    /// Camera pose for a node holding a camera: view is the inverse of the
    /// node's world transform.
    pub fn camera_pose(&self, camera_node: usize) -> Option<CameraPose> {
        let node = self.nodes.get(camera_node)?;
        Some(CameraPose {
            view: node.inverse_world,
            position: node.world.w_axis.truncate(),
        })
    }

    /// First node in the default scene carrying a camera.
    pub fn first_camera_node(&self) -> Option<usize> {
        let scene = self.default_scene()?;
        crate::node::gather_nodes(&self.nodes, &scene.nodes)
            .into_iter()
            .find(|&id| self.nodes[id].camera.is_some())
    }

    /// Environment lighting a draw under the asset tagged `asset`. An
    /// environment override on the asset's wrapper node picks the named
    /// entry (none at all when the name does not resolve); everything else
    /// falls back to the first document-level environment.
    pub fn environment_for(&self, asset: Option<&str>) -> Option<usize> {
        if let Some(tag) = asset
            && let Some(wrapper) = self
                .nodes
                .iter()
                .find(|n| n.asset_marker.as_deref() == Some(tag))
            && let Some(name) = &wrapper.environment_override
        {
            return self.image_based_lights.iter().position(|e| &e.name == name);
        }
        if self.image_based_lights.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    /// Restores every material's animatable factors to their rest values.
    pub fn clear_material_overrides(&mut self) {
        for material in &mut self.materials {
            material.clear_overrides();
        }
    }
}

pub(crate) fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn f32_field(v: &Value, key: &str, default: f32) -> f32 {
    v.get(key)
        .and_then(|x| x.as_f64())
        .map(|x| x as f32)
        .unwrap_or(default)
}

pub(crate) fn index(v: &Value, key: &str) -> Option<usize> {
    v.get(key).and_then(|x| x.as_u64()).map(|x| x as usize)
}
