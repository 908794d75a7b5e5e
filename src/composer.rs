use crate::animation;
use crate::document::Document;
use crate::error::LoadError;
use crate::loader;
use crate::material::{Material, TextureSlot};
use crate::node::{LightScope, Node, Scene, gather_nodes, update_world_transforms};
use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec3};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// How a merged asset's authored node transforms are treated under the new
/// composition root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformPolicy {
    /// Keep authored TRS/matrix untouched.
    #[default]
    Local,
    /// Bake each top-level node's inherited world transform into its local
    /// matrix so the node reads the same when reparented.
    Global,
    /// Strip transforms on the whole instantiated subtree; the wrapper node
    /// supplies placement.
    None,
}

/// One asset entry of a composition document: what to load, which nodes to
/// instantiate, and how to place them.
#[derive(Debug, Clone, Default)]
pub struct AssetRule {
    pub id: String,
    pub uri: String,
    /// Named scene to instantiate; overridden by `nodes` when non-empty.
    pub scene: Option<String>,
    pub nodes: Vec<String>,
    pub transform: TransformPolicy,
    /// Alternate sources, coarsest first; level N maps to marker
    /// `{id}_lodN`.
    pub lods: Vec<String>,
    pub light_scope: LightScope,
    pub environment: Option<String>,
    pub placement: Mat4,
}

impl AssetRule {
    pub fn from_json(v: &Value, position: usize) -> Option<Self> {
        let uri = v.get("uri")?.as_str()?.to_string();
        let id = v
            .get("id")
            .or_else(|| v.get("name"))
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("asset{position}"));

        let names = |key: &str| -> Vec<String> {
            v.get(key)
                .and_then(|x| x.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|n| n.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        let floats = |key: &str| -> Option<Vec<f32>> {
            v.get(key)?
                .as_array()
                .map(|arr| arr.iter().filter_map(|n| n.as_f64()).map(|n| n as f32).collect())
        };
        let placement = if let Some(m) = floats("matrix").filter(|m| m.len() == 16) {
            Mat4::from_cols_slice(&m)
        } else {
            let t = floats("translation")
                .filter(|f| f.len() >= 3)
                .map(|f| Vec3::new(f[0], f[1], f[2]))
                .unwrap_or(Vec3::ZERO);
            let r = floats("rotation")
                .filter(|f| f.len() >= 4)
                .map(|f| Quat::from_xyzw(f[0], f[1], f[2], f[3]).normalize())
                .unwrap_or(Quat::IDENTITY);
            let s = floats("scale")
                .filter(|f| f.len() >= 3)
                .map(|f| Vec3::new(f[0], f[1], f[2]))
                .unwrap_or(Vec3::ONE);
            Mat4::from_scale_rotation_translation(s, r, t)
        };

        Some(Self {
            id,
            uri,
            scene: v.get("scene").and_then(|x| x.as_str()).map(str::to_string),
            nodes: names("nodes"),
            transform: match v.get("transform").and_then(|x| x.as_str()) {
                Some("global") => TransformPolicy::Global,
                Some("none") => TransformPolicy::None,
                _ => TransformPolicy::Local,
            },
            lods: names("lods"),
            light_scope: match v.get("lightScope").and_then(|x| x.as_str()) {
                Some("asset") => LightScope::Asset,
                _ => LightScope::Scene,
            },
            environment: v
                .get("environment")
                .and_then(|x| x.as_str())
                .map(str::to_string),
            placement,
        })
    }
}

/// True when the JSON is a composition document rather than plain glTF.
pub fn is_composition(json: &Value) -> bool {
    json.get("assets").is_some()
}

pub fn parse_rules(json: &Value) -> Result<Vec<AssetRule>> {
    let rules: Vec<AssetRule> = json
        .get("assets")
        .and_then(|a| a.as_array())
        .map(|arr| {
            arr.iter()
                .enumerate()
                .filter_map(|(i, v)| AssetRule::from_json(v, i))
                .collect()
        })
        .unwrap_or_default();
    if rules.is_empty() {
        return Err(LoadError::EmptyComposition.into());
    }
    Ok(rules)
}

/// Loads a composition file and merges every referenced asset, in order,
/// into one document.
pub fn compose_path(path: &Path) -> Result<Document> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let json: Value = serde_json::from_slice(&bytes).map_err(LoadError::JsonParse)?;
    compose_json(&json, path.parent())
        .with_context(|| format!("composing {}", path.display()))
}

pub fn compose_json(json: &Value, base_dir: Option<&Path>) -> Result<Document> {
    let rules = parse_rules(json)?;
    let mut doc = Document::default();
    doc.materials.push(Material::default());
    doc.default_material = doc.materials.len() - 1;
    doc.samplers.push(crate::document::Sampler::default());
    doc.default_sampler = doc.samplers.len() - 1;
    doc.scenes.push(Scene {
        name: "composition".into(),
        nodes: Vec::new(),
        root_transform: Mat4::IDENTITY,
    });
    doc.scene = Some(0);
    if let Some(asset) = json.get("asset") {
        doc.asset_version = crate::document::str_field(asset, "version");
        doc.asset_generator = crate::document::str_field(asset, "generator");
    }

    for rule in &rules {
        let asset = load_asset(&rule.uri, base_dir)
            .with_context(|| format!("loading composed asset {:?}", rule.id))?;
        merge_document(&mut doc, asset, rule, &rule.id);
    }

    doc.disjoint_animations = animation::compute_disjoint_table(&doc.animations);
    Ok(doc)
}

/// An asset may itself be a composition document; recursion bottoms out at
/// plain glTF/GLB.
fn load_asset(uri: &str, base_dir: Option<&Path>) -> Result<Document> {
    let path = match base_dir {
        Some(dir) => dir.join(uri),
        None => Path::new(uri).to_path_buf(),
    };
    let bytes = fs::read(&path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if !bytes.starts_with(&crate::glb::GLB_MAGIC.to_le_bytes())
        && let Ok(json) = serde_json::from_slice::<Value>(&bytes)
        && is_composition(&json)
    {
        return compose_json(&json, path.parent());
    }
    loader::from_slice(&bytes, path.parent())
}

struct Offsets {
    accessors: usize,
    buffers: usize,
    buffer_views: usize,
    images: usize,
    textures: usize,
    samplers: usize,
    materials: usize,
    meshes: usize,
    nodes: usize,
    cameras: usize,
    lights: usize,
    skins: usize,
    variants: usize,
}

impl Offsets {
    fn of(doc: &Document) -> Self {
        Self {
            accessors: doc.accessors.len(),
            buffers: doc.buffers.len(),
            buffer_views: doc.buffer_views.len(),
            images: doc.images.len(),
            textures: doc.textures.len(),
            samplers: doc.samplers.len(),
            materials: doc.materials.len(),
            meshes: doc.meshes.len(),
            nodes: doc.nodes.len(),
            cameras: doc.cameras.len(),
            lights: doc.lights.len(),
            skins: doc.skins.len(),
            variants: doc.variants.len(),
        }
    }
}

fn shift(field: &mut Option<usize>, offset: usize) {
    if let Some(v) = field.as_mut() {
        *v += offset;
    }
}

fn shift_slot(slot: &mut Option<TextureSlot>, textures: usize) {
    if let Some(slot) = slot {
        shift(&mut slot.index, textures);
    }
}

/// Rewrites every index-valued cross-reference in `doc` by the accumulated
/// list lengths. This is the complete closure: every referencing path in
/// the typed model is covered here, in one place.
fn offset_document(doc: &mut Document, off: &Offsets) {
    for accessor in &mut doc.accessors {
        shift(&mut accessor.buffer_view, off.buffer_views);
        if let Some(sparse) = &mut accessor.sparse {
            shift(&mut sparse.indices_view, off.buffer_views);
            shift(&mut sparse.values_view, off.buffer_views);
        }
    }
    for view in &mut doc.buffer_views {
        view.buffer += off.buffers;
    }
    for image in &mut doc.images {
        shift(&mut image.buffer_view, off.buffer_views);
    }
    for texture in &mut doc.textures {
        shift(&mut texture.source, off.images);
        shift(&mut texture.sampler, off.samplers);
    }
    for material in &mut doc.materials {
        offset_material(material, off);
    }
    for mesh in &mut doc.meshes {
        for primitive in &mut mesh.primitives {
            for index in primitive.attributes.values_mut() {
                *index += off.accessors;
            }
            shift(&mut primitive.indices, off.accessors);
            shift(&mut primitive.material, off.materials);
            for target in &mut primitive.targets {
                for index in target.values_mut() {
                    *index += off.accessors;
                }
            }
            for mapping in &mut primitive.variant_mappings {
                mapping.material += off.materials;
                for variant in &mut mapping.variants {
                    *variant += off.variants;
                }
            }
        }
    }
    for node in &mut doc.nodes {
        for child in &mut node.children {
            *child += off.nodes;
        }
        shift(&mut node.parent, off.nodes);
        shift(&mut node.mesh, off.meshes);
        shift(&mut node.skin, off.skins);
        shift(&mut node.camera, off.cameras);
        shift(&mut node.light, off.lights);
    }
    for scene in &mut doc.scenes {
        for root in &mut scene.nodes {
            *root += off.nodes;
        }
    }
    for skin in &mut doc.skins {
        for joint in &mut skin.joints {
            *joint += off.nodes;
        }
        shift(&mut skin.skeleton, off.nodes);
        shift(&mut skin.inverse_bind_accessor, off.accessors);
    }
    for animation in &mut doc.animations {
        for sampler in &mut animation.samplers {
            sampler.input += off.accessors;
            sampler.output += off.accessors;
        }
        for channel in &mut animation.channels {
            shift(&mut channel.node, off.nodes);
        }
    }
}

fn offset_material(material: &mut Material, off: &Offsets) {
    shift_slot(&mut material.base_color_texture, off.textures);
    shift_slot(&mut material.metallic_roughness_texture, off.textures);
    shift_slot(&mut material.normal_texture, off.textures);
    shift_slot(&mut material.occlusion_texture, off.textures);
    shift_slot(&mut material.emissive_texture, off.textures);
    if let Some(sg) = &mut material.spec_gloss {
        shift_slot(&mut sg.diffuse_texture, off.textures);
        shift_slot(&mut sg.specular_glossiness_texture, off.textures);
    }
    if let Some(cc) = &mut material.clearcoat {
        shift_slot(&mut cc.texture, off.textures);
        shift_slot(&mut cc.roughness_texture, off.textures);
        shift_slot(&mut cc.normal_texture, off.textures);
    }
    if let Some(sh) = &mut material.sheen {
        shift_slot(&mut sh.color_texture, off.textures);
        shift_slot(&mut sh.roughness_texture, off.textures);
    }
    if let Some(tr) = &mut material.transmission {
        shift_slot(&mut tr.texture, off.textures);
    }
    if let Some(vol) = &mut material.volume {
        shift_slot(&mut vol.thickness_texture, off.textures);
    }
    if let Some(sp) = &mut material.specular {
        shift_slot(&mut sp.texture, off.textures);
        shift_slot(&mut sp.color_texture, off.textures);
    }
    if let Some(ir) = &mut material.iridescence {
        shift_slot(&mut ir.texture, off.textures);
        shift_slot(&mut ir.thickness_texture, off.textures);
    }
}

/// Top-level node ids (in the asset's own index space) to instantiate:
/// explicit node names, then an explicit named scene, then the default
/// scene, in that priority order.
fn instantiated_roots(asset: &Document, rule: &AssetRule) -> Vec<usize> {
    if !rule.nodes.is_empty() {
        let mut roots = Vec::new();
        for name in &rule.nodes {
            match asset.nodes.iter().position(|n| &n.name == name) {
                Some(id) => roots.push(id),
                None => eprintln!("[warn] composed asset has no node named {name:?}"),
            }
        }
        return roots;
    }
    if let Some(name) = &rule.scene
        && let Some(scene) = asset.scenes.iter().find(|s| &s.name == name)
    {
        return scene.nodes.clone();
    }
    asset
        .default_scene()
        .map(|s| s.nodes.clone())
        .unwrap_or_default()
}

/// Merges `asset` into `target` under a synthetic wrapper node carrying
/// `marker`. Returns the wrapper's node index in the merged document.
pub fn merge_document(
    target: &mut Document,
    mut asset: Document,
    rule: &AssetRule,
    marker: &str,
) -> usize {
    let mut roots = instantiated_roots(&asset, rule);
    roots.retain(|&root| {
        if root < asset.nodes.len() {
            true
        } else {
            asset.warn(format!(
                "asset {marker:?} lists dangling root node {root}, skipped"
            ));
            false
        }
    });

    match rule.transform {
        TransformPolicy::Local => {}
        TransformPolicy::Global => {
            // World transforms in the asset's own document, then baked into
            // the instantiated roots.
            let scene_roots: Vec<usize> = asset
                .default_scene()
                .map(|s| s.nodes.clone())
                .unwrap_or_else(|| (0..asset.nodes.len()).collect());
            update_world_transforms(&mut asset.nodes, &scene_roots, Mat4::IDENTITY, None);
            for &root in &roots {
                let world = asset.nodes[root].world;
                asset.nodes[root].bake_matrix(world);
            }
        }
        TransformPolicy::None => {
            for id in gather_nodes(&asset.nodes, &roots) {
                asset.nodes[id].strip_transform();
            }
        }
    }

    let off = Offsets::of(target);
    offset_document(&mut asset, &off);
    let roots: Vec<usize> = roots.into_iter().map(|r| r + off.nodes).collect();

    // Variant names are deduplicated across assets the same way the loader
    // deduplicates within one document.
    for name in std::mem::take(&mut asset.variants) {
        let mut merged = name.clone();
        let mut n = 2;
        while target.variants.contains(&merged) {
            merged = format!("{name} #{n}");
            n += 1;
        }
        target.variants.push(merged);
    }

    target.accessors.append(&mut asset.accessors);
    target.buffers.append(&mut asset.buffers);
    target.buffer_views.append(&mut asset.buffer_views);
    target.images.append(&mut asset.images);
    target.textures.append(&mut asset.textures);
    target.samplers.append(&mut asset.samplers);
    target.materials.append(&mut asset.materials);
    target.meshes.append(&mut asset.meshes);
    target.nodes.append(&mut asset.nodes);
    target.cameras.append(&mut asset.cameras);
    target.lights.append(&mut asset.lights);
    target
        .image_based_lights
        .append(&mut asset.image_based_lights);
    target.skins.append(&mut asset.skins);
    target.animations.append(&mut asset.animations);
    target.warnings.append(&mut asset.warnings);

    let (scale, rotation, translation) = rule.placement.to_scale_rotation_translation();
    let wrapper = Node {
        name: marker.to_string(),
        children: roots.clone(),
        translation: crate::material::Animatable::new(translation),
        rotation: crate::material::Animatable::new(rotation),
        scale: crate::material::Animatable::new(scale),
        asset_marker: Some(marker.to_string()),
        light_scope: rule.light_scope,
        environment_override: rule.environment.clone(),
        ..Node::default()
    };
    target.nodes.push(wrapper);
    let wrapper_id = target.nodes.len() - 1;
    for root in roots {
        if let Some(node) = target.nodes.get_mut(root) {
            node.parent = Some(wrapper_id);
        }
    }

    if target.scenes.is_empty() {
        target.scenes.push(Scene::default());
        target.scene = Some(0);
    }
    let scene = target.scene.unwrap_or(0).min(target.scenes.len() - 1);
    target.scenes[scene].nodes.push(wrapper_id);

    wrapper_id
}

/// Marker under which LOD level `level` of `rule` merges.
pub fn lod_marker(rule: &AssetRule, level: usize) -> String {
    format!("{}_lod{level}", rule.id)
}

/// Incremental refinement: merges LOD `level` of an already-composed asset
/// into `doc`, unless that level is already present. Level 0 is the base
/// asset itself. Returns the wrapper index of a newly merged level.
pub fn merge_lod(
    doc: &mut Document,
    rule: &AssetRule,
    level: usize,
    base_dir: Option<&Path>,
) -> Result<Option<usize>> {
    let marker = if level == 0 {
        rule.id.clone()
    } else {
        lod_marker(rule, level)
    };
    if doc
        .nodes
        .iter()
        .any(|n| n.asset_marker.as_deref() == Some(marker.as_str()))
    {
        return Ok(None);
    }

    let uri = if level == 0 {
        rule.uri.as_str()
    } else {
        match rule.lods.get(level - 1) {
            Some(uri) => uri.as_str(),
            None => {
                doc.warn(format!("asset {:?} has no LOD level {level}", rule.id));
                return Ok(None);
            }
        }
    };

    let asset = load_asset(uri, base_dir)
        .with_context(|| format!("loading LOD {level} of {:?}", rule.id))?;
    let wrapper = merge_document(doc, asset, rule, &marker);
    doc.disjoint_animations = animation::compute_disjoint_table(&doc.animations);
    Ok(Some(wrapper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Mesh, Primitive};
    use serde_json::json;

    fn doc_with(nodes: usize, materials: usize) -> Document {
        let mut doc = Document::default();
        for i in 0..materials {
            let mut m = Material::default();
            m.name = format!("m{i}");
            doc.materials.push(m);
        }
        for i in 0..nodes {
            let mut primitive = Primitive::from_json(&json!({"attributes": {"POSITION": 0}}));
            primitive.material = Some(i % materials.max(1));
            doc.meshes.push(Mesh {
                name: format!("mesh{i}"),
                primitives: vec![primitive],
                ..Mesh::default()
            });
            doc.nodes.push(Node {
                name: format!("n{i}"),
                mesh: Some(i),
                ..Node::default()
            });
        }
        doc.scenes.push(Scene {
            name: "root".into(),
            nodes: (0..nodes).collect(),
            root_transform: Mat4::IDENTITY,
        });
        doc.scene = Some(0);
        doc
    }

    #[test]
    fn merge_shifts_every_reference() {
        let mut merged = doc_with(5, 3);
        let b = doc_with(2, 1);
        let rule = AssetRule {
            id: "b".into(),
            placement: Mat4::IDENTITY,
            ..AssetRule::default()
        };
        let wrapper = merge_document(&mut merged, b, &rule, "b");

        // 5 + 2 original nodes plus the synthetic wrapper.
        assert_eq!(merged.nodes.len(), 8);
        assert_eq!(merged.materials.len(), 4);
        assert_eq!(merged.meshes.len(), 7);

        // B's node 0 landed at index 5, pointing at B's mesh 0 (now 5)
        // which references B's material 0 (now 3).
        assert_eq!(merged.nodes[5].name, "n0");
        assert_eq!(merged.nodes[5].mesh, Some(5));
        assert_eq!(merged.meshes[5].primitives[0].material, Some(3));

        // The wrapper adopts B's roots and carries the marker.
        assert_eq!(wrapper, 7);
        assert_eq!(merged.nodes[wrapper].asset_marker.as_deref(), Some("b"));
        assert_eq!(merged.nodes[wrapper].children, vec![5, 6]);
        assert_eq!(merged.nodes[5].parent, Some(wrapper));
        assert!(merged.scenes[0].nodes.contains(&wrapper));
    }

    #[test]
    fn explicit_node_names_win_over_scenes() {
        let mut merged = doc_with(1, 1);
        let b = doc_with(3, 1);
        let rule = AssetRule {
            id: "b".into(),
            nodes: vec!["n2".into()],
            placement: Mat4::IDENTITY,
            ..AssetRule::default()
        };
        let wrapper = merge_document(&mut merged, b, &rule, "b");
        // Only the named node is instantiated under the wrapper.
        assert_eq!(merged.nodes[wrapper].children, vec![3]);
        assert_eq!(merged.nodes[3].name, "n2");
    }

    #[test]
    fn none_policy_strips_subtree_transforms() {
        let mut merged = doc_with(1, 1);
        let mut b = doc_with(1, 1);
        b.nodes[0].translation = crate::material::Animatable::new(Vec3::new(7.0, 0.0, 0.0));
        let rule = AssetRule {
            id: "b".into(),
            transform: TransformPolicy::None,
            placement: Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)),
            ..AssetRule::default()
        };
        let wrapper = merge_document(&mut merged, b, &rule, "b");

        let roots = merged.scenes[0].nodes.clone();
        update_world_transforms(&mut merged.nodes, &roots, Mat4::IDENTITY, None);
        // The stripped node sits exactly at the wrapper's placement.
        let w = merged.nodes[merged.nodes[wrapper].children[0]].world.w_axis;
        assert!((w.x).abs() < 1e-6 && (w.y - 3.0).abs() < 1e-6);
    }

    #[test]
    fn global_policy_bakes_inherited_transform() {
        let mut merged = doc_with(0, 1);
        // In B, n1 is nested under n0; only n1 is instantiated.
        let mut b = Document::default();
        b.nodes.push(Node {
            name: "n0".into(),
            children: vec![1],
            translation: crate::material::Animatable::new(Vec3::new(5.0, 0.0, 0.0)),
            ..Node::default()
        });
        b.nodes.push(Node {
            name: "n1".into(),
            translation: crate::material::Animatable::new(Vec3::new(0.0, 2.0, 0.0)),
            ..Node::default()
        });
        b.scenes.push(Scene {
            name: String::new(),
            nodes: vec![0],
            root_transform: Mat4::IDENTITY,
        });
        b.scene = Some(0);

        let rule = AssetRule {
            id: "b".into(),
            nodes: vec!["n1".into()],
            transform: TransformPolicy::Global,
            placement: Mat4::IDENTITY,
            ..AssetRule::default()
        };
        let wrapper = merge_document(&mut merged, b, &rule, "b");

        update_world_transforms(&mut merged.nodes, &[wrapper], Mat4::IDENTITY, None);
        let child = merged.nodes[wrapper].children[0];
        let w = merged.nodes[child].world.w_axis;
        // n1's inherited (5, 2, 0) placement survives reparenting.
        assert!((w.x - 5.0).abs() < 1e-6 && (w.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn variant_indices_shift_with_the_variant_list() {
        let mut merged = doc_with(0, 1);
        merged.variants = vec!["clean".into()];
        let mut b = doc_with(1, 1);
        b.variants = vec!["worn".into()];
        b.meshes[0].primitives[0].variant_mappings =
            vec![crate::mesh::VariantMapping {
                variants: vec![0],
                material: 0,
            }];

        let rule = AssetRule {
            id: "b".into(),
            placement: Mat4::IDENTITY,
            ..AssetRule::default()
        };
        merge_document(&mut merged, b, &rule, "b");

        assert_eq!(merged.variants, vec!["clean", "worn"]);
        let mapping = &merged.meshes[0].primitives[0].variant_mappings[0];
        assert_eq!(mapping.variants, vec![1]);
        assert_eq!(mapping.material, 1);
    }

    #[test]
    fn dangling_scene_root_is_skipped_not_fatal() {
        let mut merged = doc_with(0, 1);
        let mut b = doc_with(1, 1);
        // The asset's scene references a node it does not have.
        b.scenes[0].nodes = vec![5];
        let rule = AssetRule {
            id: "b".into(),
            transform: TransformPolicy::Global,
            placement: Mat4::IDENTITY,
            ..AssetRule::default()
        };
        let wrapper = merge_document(&mut merged, b, &rule, "b");

        assert!(merged.nodes[wrapper].children.is_empty());
        assert!(merged.warnings.iter().any(|w| w.contains("dangling root")));
    }

    #[test]
    fn empty_composition_is_rejected() {
        let err = compose_json(&json!({"assets": []}), None).expect_err("empty");
        assert!(err.to_string().contains("composition"));
    }

    #[test]
    fn lod_merge_is_incremental() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gltf = json!({
            "asset": {"version": "2.0"},
            "scenes": [{"nodes": [0]}],
            "nodes": [{"name": "lod-root"}],
        });
        std::fs::write(dir.path().join("base.gltf"), gltf.to_string()).expect("write");
        std::fs::write(dir.path().join("fine.gltf"), gltf.to_string()).expect("write");

        let rule = AssetRule {
            id: "rock".into(),
            uri: "base.gltf".into(),
            lods: vec!["fine.gltf".into()],
            placement: Mat4::IDENTITY,
            ..AssetRule::default()
        };

        let mut doc = Document::default();
        let first = merge_lod(&mut doc, &rule, 0, Some(dir.path())).expect("merge");
        assert!(first.is_some());
        let node_count = doc.nodes.len();

        // Same level again: no-op.
        assert!(merge_lod(&mut doc, &rule, 0, Some(dir.path())).expect("merge").is_none());
        assert_eq!(doc.nodes.len(), node_count);

        // Next level merges under its own marker.
        let second = merge_lod(&mut doc, &rule, 1, Some(dir.path())).expect("merge");
        let wrapper = second.expect("new level merged");
        assert_eq!(
            doc.nodes[wrapper].asset_marker.as_deref(),
            Some("rock_lod1")
        );
        assert!(doc.nodes.len() > node_count);

        // Missing level: warn and no-op.
        assert!(merge_lod(&mut doc, &rule, 5, Some(dir.path())).expect("merge").is_none());
    }
}
