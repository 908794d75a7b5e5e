use crate::document::{Document, LightKind};
use crate::material::AlphaMode;
use crate::node::{CameraPose, LightScope, gather_nodes};
use glam::Vec3;
use serde::Serialize;

/// One renderable (node, primitive) pair with its material resolved for the
/// active variant and its sort depth already computed.
#[derive(Debug, Clone, Serialize)]
pub struct DrawItem {
    pub node: usize,
    pub mesh: usize,
    pub primitive: usize,
    pub material: usize,
    pub skinned: bool,
    /// View-space Z of the primitive centroid. Negative in front of the
    /// camera in a right-handed view space.
    pub depth: f32,
    /// Composer asset tag inherited from the nearest marked ancestor.
    pub asset: Option<String>,
}

/// A punctual light denormalized with its world placement, ready for
/// uniform upload.
#[derive(Debug, Clone)]
pub struct SceneLight {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub range: Option<f32>,
    pub inner_cone_angle: f32,
    pub outer_cone_angle: f32,
    pub position: Vec3,
    pub direction: Vec3,
    pub scope: LightScope,
    pub asset: Option<String>,
}

/// The frame plan: three buckets submitted opaque, then transmission, then
/// transparent. When the transmission bucket is non-empty the backend first
/// renders opaque + transparent into an offscreen capture and generates its
/// mipmap chain for the refraction lookup.
#[derive(Debug, Clone, Default)]
pub struct DrawPlan {
    pub opaque: Vec<DrawItem>,
    pub transmission: Vec<DrawItem>,
    pub transparent: Vec<DrawItem>,
    pub lights: Vec<SceneLight>,
    pub uses_fallback_lights: bool,
    pub needs_opaque_capture: bool,
}

impl DrawPlan {
    pub fn draw_count(&self) -> usize {
        self.opaque.len() + self.transmission.len() + self.transparent.len()
    }

    /// Items in submission order.
    pub fn ordered(&self) -> impl Iterator<Item = &DrawItem> {
        self.opaque
            .iter()
            .chain(self.transmission.iter())
            .chain(self.transparent.iter())
    }

    /// Lights applying to a draw under `asset`: scene-scoped lights always,
    /// asset-scoped lights only inside their own subtree.
    pub fn lights_for(&self, asset: Option<&str>) -> Vec<&SceneLight> {
        self.lights
            .iter()
            .filter(|light| match light.scope {
                LightScope::Scene => true,
                LightScope::Asset => light.asset.as_deref() == asset,
            })
            .collect()
    }
}

/// Nearest ancestor asset marker, if any. The walk is bounded by the node
/// count so a malformed parent chain cannot loop.
fn asset_tag(doc: &Document, mut id: usize) -> Option<String> {
    for _ in 0..=doc.nodes.len() {
        let node = doc.nodes.get(id)?;
        if let Some(tag) = &node.asset_marker {
            return Some(tag.clone());
        }
        id = node.parent?;
    }
    None
}

fn fallback_lights() -> Vec<SceneLight> {
    let directional = |direction: Vec3, intensity: f32| SceneLight {
        kind: LightKind::Directional,
        color: Vec3::ONE,
        intensity,
        range: None,
        inner_cone_angle: 0.0,
        outer_cone_angle: std::f32::consts::FRAC_PI_4,
        position: Vec3::ZERO,
        direction: direction.normalize(),
        scope: LightScope::Scene,
        asset: None,
    };
    vec![
        directional(Vec3::new(1.0, -1.0, -1.0), 1.0),
        directional(Vec3::new(-1.0, 1.0, 1.0), 0.3),
    ]
}

/// Builds the draw plan for the default scene. World transforms must be
/// current; this pass only reads them. `ibl_enabled` reflects the render
/// parameters: a document-level environment only counts as lighting while
/// image-based lighting is switched on.
pub fn build_draw_plan(
    doc: &Document,
    camera: Option<&CameraPose>,
    active_variant: Option<usize>,
    ibl_enabled: bool,
) -> DrawPlan {
    let mut plan = DrawPlan::default();
    let Some(scene) = doc.default_scene() else {
        return plan;
    };
    let order = gather_nodes(&doc.nodes, &scene.nodes);

    for node_id in order {
        let node = &doc.nodes[node_id];

        if let Some(light_id) = node.light {
            if let Some(light) = doc.lights.get(light_id) {
                let (_, rotation, translation) = node.world.to_scale_rotation_translation();
                plan.lights.push(SceneLight {
                    kind: light.kind,
                    color: light.color,
                    intensity: light.intensity,
                    range: light.range,
                    inner_cone_angle: light.inner_cone_angle,
                    outer_cone_angle: light.outer_cone_angle,
                    position: translation,
                    direction: rotation * Vec3::NEG_Z,
                    scope: node.light_scope,
                    asset: asset_tag(doc, node_id),
                });
            }
        }

        let Some(mesh_id) = node.mesh else {
            continue;
        };
        let Some(mesh) = doc.meshes.get(mesh_id) else {
            continue;
        };
        let asset = asset_tag(doc, node_id);

        for (primitive_id, primitive) in mesh.primitives.iter().enumerate() {
            let material_id = primitive
                .resolved_material(active_variant)
                .filter(|&m| m < doc.materials.len())
                .unwrap_or(doc.default_material);
            let material = &doc.materials[material_id];

            let depth = match camera {
                Some(camera) => {
                    let centroid = primitive.centroid.unwrap_or(Vec3::ZERO);
                    let world = doc.nodes[node_id].world.transform_point3(centroid);
                    camera.view.transform_point3(world).z
                }
                None => 0.0,
            };

            let item = DrawItem {
                node: node_id,
                mesh: mesh_id,
                primitive: primitive_id,
                material: material_id,
                skinned: node.skin.is_some(),
                depth,
                asset: asset.clone(),
            };

            // Transmission wins over the blend classification; a transmissive
            // material in BLEND mode still renders through the capture path.
            if material.has_transmission() {
                plan.transmission.push(item);
            } else if material.alpha_mode == AlphaMode::Blend {
                plan.transparent.push(item);
            } else {
                plan.opaque.push(item);
            }
        }
    }

    if camera.is_some() {
        // Behind-camera items never contribute; drop them before sorting.
        plan.transmission.retain(|i| i.depth <= 0.0);
        plan.transparent.retain(|i| i.depth <= 0.0);
        sort_back_to_front(&mut plan.transmission);
        sort_back_to_front(&mut plan.transparent);
    }

    plan.needs_opaque_capture = !plan.transmission.is_empty();
    let ibl_lit = ibl_enabled && !doc.image_based_lights.is_empty();
    if plan.lights.is_empty() && !ibl_lit {
        plan.lights = fallback_lights();
        plan.uses_fallback_lights = true;
    }
    plan
}

/// Ascending view-space Z: most negative (farthest) first. Stable, so draws
/// at equal depth keep traversal order.
fn sort_back_to_front(items: &mut [DrawItem]) {
    items.sort_by(|a, b| a.depth.partial_cmp(&b.depth).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::material::Material;
    use crate::mesh::{Mesh, Primitive};
    use crate::node::{Node, Scene, update_world_transforms};
    use glam::Mat4;
    use serde_json::json;

    fn mesh_with_primitive(material: Option<usize>) -> Mesh {
        let mut primitive = Primitive::from_json(&json!({"attributes": {"POSITION": 0}}));
        primitive.material = material;
        primitive.centroid = Some(Vec3::ZERO);
        Mesh {
            name: String::new(),
            primitives: vec![primitive],
            ..Mesh::default()
        }
    }

    fn doc_with_nodes(nodes: Vec<Node>, meshes: Vec<Mesh>, materials: Vec<Material>) -> Document {
        let roots = (0..nodes.len()).collect();
        let mut doc = Document {
            nodes,
            meshes,
            materials,
            scenes: vec![Scene {
                name: String::new(),
                nodes: roots,
                root_transform: Mat4::IDENTITY,
            }],
            ..Document::default()
        };
        doc.materials.push(Material::default());
        doc.default_material = doc.materials.len() - 1;
        update_world_transforms(
            &mut doc.nodes,
            &doc.scenes[0].nodes.clone(),
            Mat4::IDENTITY,
            None,
        );
        doc
    }

    fn camera_at(position: Vec3) -> CameraPose {
        CameraPose {
            view: Mat4::look_at_rh(position, Vec3::ZERO, Vec3::Y),
            position,
        }
    }

    #[test]
    fn transmission_outranks_blend() {
        let material = Material::from_json(&json!({
            "alphaMode": "BLEND",
            "extensions": {"KHR_materials_transmission": {"transmissionFactor": 1.0}}
        }));
        let doc = doc_with_nodes(
            vec![Node {
                mesh: Some(0),
                ..Node::default()
            }],
            vec![mesh_with_primitive(Some(0))],
            vec![material],
        );

        let plan = build_draw_plan(&doc, None, None, true);
        assert_eq!(plan.transmission.len(), 1);
        assert!(plan.transparent.is_empty());
        assert!(plan.needs_opaque_capture);
    }

    #[test]
    fn transparent_draws_sort_back_to_front() {
        let blend = Material::from_json(&json!({"alphaMode": "BLEND"}));
        let node_at = |z: f32| Node {
            mesh: Some(0),
            translation: crate::material::Animatable::new(Vec3::new(0.0, 0.0, z)),
            ..Node::default()
        };
        let mut doc = doc_with_nodes(
            vec![node_at(0.0), node_at(-4.0), node_at(-2.0), node_at(20.0)],
            vec![mesh_with_primitive(Some(0))],
            vec![blend],
        );
        let roots = doc.scenes[0].nodes.clone();
        update_world_transforms(&mut doc.nodes, &roots, Mat4::IDENTITY, None);

        let camera = camera_at(Vec3::new(0.0, 0.0, 10.0));
        let plan = build_draw_plan(&doc, Some(&camera), None, true);

        // The node at z=20 sits behind the camera and is culled.
        assert_eq!(plan.transparent.len(), 3);
        let order: Vec<usize> = plan.transparent.iter().map(|i| i.node).collect();
        assert_eq!(order, vec![1, 2, 0]);
        let depths: Vec<f32> = plan.transparent.iter().map(|i| i.depth).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn dangling_material_falls_back_to_default() {
        let doc = doc_with_nodes(
            vec![Node {
                mesh: Some(0),
                ..Node::default()
            }],
            vec![mesh_with_primitive(Some(99))],
            vec![],
        );
        let plan = build_draw_plan(&doc, None, None, true);
        assert_eq!(plan.opaque[0].material, doc.default_material);
    }

    #[test]
    fn fallback_lights_appear_only_without_scene_lights() {
        let doc = doc_with_nodes(
            vec![Node {
                mesh: Some(0),
                ..Node::default()
            }],
            vec![mesh_with_primitive(None)],
            vec![],
        );
        let plan = build_draw_plan(&doc, None, None, true);
        assert!(plan.uses_fallback_lights);
        assert_eq!(plan.lights.len(), 2);
        assert_eq!(plan.lights[0].kind, LightKind::Directional);
        assert!(plan.lights[0].intensity > plan.lights[1].intensity);
    }

    #[test]
    fn disabled_ibl_reenables_fallback_lights() {
        let mut doc = doc_with_nodes(
            vec![Node {
                mesh: Some(0),
                ..Node::default()
            }],
            vec![mesh_with_primitive(None)],
            vec![],
        );
        doc.image_based_lights = vec![crate::document::ImageBasedLight {
            name: "studio".into(),
            intensity: 1.0,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }];

        // The environment lights the scene while IBL is on.
        let lit = build_draw_plan(&doc, None, None, true);
        assert!(!lit.uses_fallback_lights);
        assert!(lit.lights.is_empty());

        // With IBL off the environment no longer counts as lighting.
        let unlit = build_draw_plan(&doc, None, None, false);
        assert!(unlit.uses_fallback_lights);
        assert_eq!(unlit.lights.len(), 2);
    }

    #[test]
    fn asset_scoped_lights_stay_in_their_subtree() {
        let light = |scope, asset: Option<&str>| SceneLight {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            range: None,
            inner_cone_angle: 0.0,
            outer_cone_angle: std::f32::consts::FRAC_PI_4,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            scope,
            asset: asset.map(str::to_string),
        };
        let plan = DrawPlan {
            lights: vec![
                light(LightScope::Scene, None),
                light(LightScope::Asset, Some("lamp")),
            ],
            ..DrawPlan::default()
        };

        assert_eq!(plan.lights_for(Some("lamp")).len(), 2);
        assert_eq!(plan.lights_for(None).len(), 1);
        assert_eq!(plan.lights_for(Some("other")).len(), 1);
    }

    #[test]
    fn punctual_light_takes_node_world_placement() {
        let mut doc = doc_with_nodes(
            vec![Node {
                light: Some(0),
                translation: crate::material::Animatable::new(Vec3::new(0.0, 5.0, 0.0)),
                ..Node::default()
            }],
            vec![],
            vec![],
        );
        doc.lights = vec![crate::document::Light::from_json(&json!({
            "type": "point",
            "intensity": 40.0,
        }))];
        let roots = doc.scenes[0].nodes.clone();
        update_world_transforms(&mut doc.nodes, &roots, Mat4::IDENTITY, None);

        let plan = build_draw_plan(&doc, None, None, true);
        assert!(!plan.uses_fallback_lights);
        assert_eq!(plan.lights.len(), 1);
        assert!((plan.lights[0].position.y - 5.0).abs() < 1e-6);
    }

    #[test]
    fn submission_order_is_opaque_transmission_transparent() {
        let opaque = Material::default();
        let blend = Material::from_json(&json!({"alphaMode": "BLEND"}));
        let glassy = Material::from_json(&json!({
            "extensions": {"KHR_materials_transmission": {"transmissionFactor": 0.5}}
        }));
        let node = |mesh: usize| Node {
            mesh: Some(mesh),
            ..Node::default()
        };
        let doc = doc_with_nodes(
            vec![node(0), node(1), node(2)],
            vec![
                mesh_with_primitive(Some(1)),
                mesh_with_primitive(Some(2)),
                mesh_with_primitive(Some(0)),
            ],
            vec![opaque, blend, glassy],
        );

        let plan = build_draw_plan(&doc, None, None, true);
        let materials: Vec<usize> = plan.ordered().map(|i| i.material).collect();
        assert_eq!(materials, vec![0, 2, 1]);
    }
}
