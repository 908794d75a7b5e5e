use crate::animation::{self, Clip};
use crate::document::Document;
use crate::draw_list::{self, DrawItem, DrawPlan};
use crate::gpu_backend::{GpuBackend, ImageDecoder, ProgramHandle};
use crate::material::{FeatureToggles, ShaderInputs, UniformValue};
use crate::node::{CameraPose, update_world_transforms};
use crate::skin;
use glam::Mat4;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToneMapping {
    None,
    #[default]
    AcesHill,
    KhrNeutral,
}

/// Per-State rendering switches. Everything here changes shader selection
/// or frame behavior without touching the loaded document.
#[derive(Debug, Clone, Serialize)]
pub struct RenderParams {
    pub tone_mapping: ToneMapping,
    pub debug_channel: Option<String>,
    pub exposure: f32,
    pub toggles: FeatureToggles,
    pub use_ibl: bool,
    pub use_directional_fallback: bool,
    pub skinning: bool,
    pub morphing: bool,
    pub active_variant: Option<usize>,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            tone_mapping: ToneMapping::default(),
            debug_channel: None,
            exposure: 1.0,
            toggles: FeatureToggles::default(),
            use_ibl: true,
            use_directional_fallback: true,
            skinning: true,
            morphing: true,
            active_variant: None,
        }
    }
}

const PBR_SHADER_ID: &str = "pbr";

const PBR_VERTEX_SRC: &str = "\
#version 300 es
in vec3 a_position;
uniform mat4 u_ViewProjectionMatrix;
uniform mat4 u_ModelMatrix;
void main() {
    gl_Position = u_ViewProjectionMatrix * u_ModelMatrix * vec4(a_position, 1.0);
}
";

const PBR_FRAGMENT_SRC: &str = "\
#version 300 es
precision highp float;
uniform vec4 u_BaseColorFactor;
out vec4 o_color;
void main() {
    o_color = u_BaseColorFactor;
}
";

/// One GPU context: the backend plus the shader-permutation cache. A failed
/// permutation is cached as `None` so it is reported once, not per frame.
pub struct View<B: GpuBackend> {
    pub backend: B,
    programs: HashMap<(String, Vec<String>), Option<ProgramHandle>>,
}

impl<B: GpuBackend> View<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            programs: HashMap::new(),
        }
    }

    /// Program for a permutation, keyed by (shader id, sorted defines).
    /// Identical permutations never recompile.
    pub fn program(&mut self, shader_id: &str, defines: &[String]) -> Option<ProgramHandle> {
        let mut sorted = defines.to_vec();
        sorted.sort();
        let key = (shader_id.to_string(), sorted);
        if let Some(cached) = self.programs.get(&key) {
            return *cached;
        }
        let compiled = self
            .backend
            .compile_and_link(PBR_VERTEX_SRC, PBR_FRAGMENT_SRC, &key.1);
        let handle = match compiled {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("[warn] shader permutation rejected: {e}");
                None
            }
        };
        self.programs.insert(key, handle);
        handle
    }

    pub fn cached_permutations(&self) -> usize {
        self.programs.len()
    }
}

/// Fills `image.size` for every decodable image. Decode failures degrade to
/// a warning and a missing texture, never a load failure.
pub fn decode_image_sizes(doc: &mut Document, decoder: &dyn ImageDecoder) {
    for i in 0..doc.images.len() {
        if doc.images[i].size.is_some() {
            continue;
        }
        let Some(bytes) = crate::loader::image_bytes(doc, i).map(<[u8]>::to_vec) else {
            continue;
        };
        let mime = doc.images[i].mime_type.clone();
        match decoder.decode(&bytes, mime.as_deref()) {
            Ok(decoded) => doc.images[i].size = Some((decoded.width, decoded.height)),
            Err(e) => doc.warn(format!("image {i} not decoded: {e}")),
        }
    }
}

/// One viewer state over a document: camera choice, animation activation
/// and rendering parameters. Multiple States may share a View.
#[derive(Default)]
pub struct State {
    pub document: Option<Document>,
    pub camera_node: Option<usize>,
    pub active_animations: Vec<usize>,
    pub clips: Vec<Clip>,
    pub params: RenderParams,
    last_time: Option<f32>,
}

impl State {
    pub fn new(document: Document) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }

    /// Activates an animation unless it shares a (node, path) target with
    /// one already active; conflicting activation is refused.
    pub fn try_activate_animation(&mut self, index: usize) -> bool {
        let Some(doc) = &self.document else {
            return false;
        };
        if index >= doc.animations.len() {
            return false;
        }
        if self.active_animations.contains(&index) {
            return true;
        }
        let compatible = self.active_animations.iter().all(|&active| {
            doc.disjoint_animations
                .get(active)
                .is_some_and(|set| set.contains(&index))
        });
        if compatible {
            self.active_animations.push(index);
        }
        compatible
    }

    pub fn deactivate_animation(&mut self, index: usize) {
        self.active_animations.retain(|&a| a != index);
    }
}

fn item_defines(
    doc: &Document,
    item: &DrawItem,
    params: &RenderParams,
    inputs: &ShaderInputs,
    has_environment: bool,
) -> Vec<String> {
    let mut defines = inputs.defines.clone();
    if item.skinned && params.skinning {
        defines.push("USE_SKINNING 1".into());
    }
    if params.morphing
        && doc
            .meshes
            .get(item.mesh)
            .and_then(|m| m.primitives.get(item.primitive))
            .is_some_and(|p| !p.targets.is_empty())
    {
        defines.push("USE_MORPHING 1".into());
    }
    if has_environment {
        defines.push("USE_IBL 1".into());
    }
    match params.tone_mapping {
        ToneMapping::None => {}
        ToneMapping::AcesHill => defines.push("TONEMAP_ACES_HILL 1".into()),
        ToneMapping::KhrNeutral => defines.push("TONEMAP_KHR_PBR_NEUTRAL 1".into()),
    }
    if let Some(channel) = &params.debug_channel {
        defines.push(format!("DEBUG_{} 1", channel.to_uppercase()));
    }
    defines
}

fn submit_item<B: GpuBackend>(
    view: &mut View<B>,
    doc: &Document,
    plan: &DrawPlan,
    item: &DrawItem,
    params: &RenderParams,
) {
    let Some(material) = doc.materials.get(item.material) else {
        return;
    };
    let mut inputs = crate::material::shader_inputs(material, &params.toggles);
    inputs
        .properties
        .insert("u_Exposure".into(), UniformValue::Float(params.exposure));

    // The environment is resolved per asset subtree; a wrapper-node override
    // replaces the document default within that asset.
    let environment = if params.use_ibl {
        doc.environment_for(item.asset.as_deref())
    } else {
        None
    };
    if let Some(env) = environment.and_then(|i| doc.image_based_lights.get(i)) {
        inputs.properties.insert(
            "u_EnvironmentIntensity".into(),
            UniformValue::Float(env.intensity),
        );
    }

    let defines = item_defines(doc, item, params, &inputs, environment.is_some());
    let Some(program) = view.program(PBR_SHADER_ID, &defines) else {
        return;
    };
    view.backend.set_lights(&plan.lights_for(item.asset.as_deref()));
    view.backend.upload_uniforms(program, &inputs);

    if params.morphing
        && let Some(mesh) = doc.meshes.get(item.mesh)
        && mesh
            .primitives
            .get(item.primitive)
            .is_some_and(|p| !p.targets.is_empty())
    {
        view.backend
            .set_morph_weights(item.mesh, &mesh.current_weights());
    }

    if item.skinned && params.skinning {
        let node = &doc.nodes[item.node];
        if let Some(s) = node.skin.and_then(|s| doc.skins.get(s)) {
            let matrices = s.joint_matrices(&doc.nodes, node.world);
            view.backend
                .upload_joint_texture(item.node, &skin::build_joint_texture(&matrices));
        }
    }
    view.backend.draw(program, item);
}

/// Advances animation time, refreshes transforms and submits one frame.
/// A state without a document is a no-op. Returns the submitted plan for
/// inspection.
pub fn render_frame<B: GpuBackend>(
    view: &mut View<B>,
    state: &mut State,
    time: f32,
) -> Option<DrawPlan> {
    let State {
        document,
        camera_node,
        active_animations,
        clips,
        params,
        last_time,
    } = state;
    let Some(doc) = document.as_mut() else {
        return None;
    };

    let dt = last_time.map(|prev| (time - prev).max(0.0)).unwrap_or(0.0);
    *last_time = Some(time);

    // Every animation is advanced every frame: active ones with the clock,
    // inactive ones with the reset signal that restores rest values.
    let mut driven = vec![None; doc.animations.len()];
    for &index in active_animations.iter() {
        if index < driven.len() {
            driven[index] = Some(time);
        }
    }
    for clip in clips.iter_mut() {
        if let Some(clip_time) = clip.advance(dt) {
            for &index in &clip.animations {
                if index < driven.len() {
                    driven[index] = Some(clip_time);
                }
            }
        }
    }
    for (index, time) in driven.iter().enumerate() {
        animation::advance(doc, index, *time);
    }

    // First transform pass without a camera, then billboards against the
    // resolved camera pose.
    let Some(scene_roots) = doc.default_scene().map(|s| s.nodes.clone()) else {
        return None;
    };
    let root_transform = doc
        .default_scene()
        .map(|s| s.root_transform)
        .unwrap_or(Mat4::IDENTITY);
    update_world_transforms(&mut doc.nodes, &scene_roots, root_transform, None);

    let camera = (*camera_node)
        .or_else(|| doc.first_camera_node())
        .and_then(|node| doc.camera_pose(node))
        .unwrap_or(CameraPose {
            view: Mat4::IDENTITY,
            position: glam::Vec3::ZERO,
        });
    update_world_transforms(&mut doc.nodes, &scene_roots, root_transform, Some(&camera));

    let mut plan =
        draw_list::build_draw_plan(doc, Some(&camera), params.active_variant, params.use_ibl);
    if plan.uses_fallback_lights && !params.use_directional_fallback {
        plan.lights.clear();
        plan.uses_fallback_lights = false;
    }

    submit_plan(view, doc, &plan, params);
    Some(plan)
}

fn submit_plan<B: GpuBackend>(
    view: &mut View<B>,
    doc: &Document,
    plan: &DrawPlan,
    params: &RenderParams,
) {
    if plan.needs_opaque_capture {
        // Capture pass: everything except transmission itself, then a mip
        // chain for the roughness-dependent refraction lookup.
        view.backend.begin_offscreen_pass();
        for item in plan.opaque.iter().chain(plan.transparent.iter()) {
            submit_item(view, doc, plan, item, params);
        }
        view.backend.generate_mipmaps();
    }

    view.backend.begin_main_pass();
    for item in plan.ordered() {
        submit_item(view, doc, plan, item, params);
    }
    view.backend.end_frame();
}
