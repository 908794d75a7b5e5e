use crate::accessor::{Accessor, Buffer, BufferView};
use crate::animation::{self, Animation};
use crate::document::{Camera, Document, Image, ImageBasedLight, Light, Sampler, Texture};
use crate::error::LoadError;
use crate::glb;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::node::{Node, Scene};
use crate::skin::Skin;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolves relative URIs against the source file's directory. Data URIs
/// are handled inline and never touch the filesystem.
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    root: Option<PathBuf>,
}

fn normalize_rel_path(path: &str) -> Option<String> {
    let raw = path.trim().replace('\\', "/");
    if raw.is_empty() {
        return None;
    }

    let mut out = PathBuf::new();
    for comp in Path::new(&raw).components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(v) => out.push(v),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let s = out.to_string_lossy().replace('\\', "/");
    if s.is_empty() { None } else { Some(s) }
}

/// Minimal percent-decoding for file URIs ("my%20model.bin").
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Ok(v) = u8::from_str_radix(&s[i + 1..i + 3], 16)
        {
            out.push(v);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl AssetResolver {
    pub fn new(root: Option<&Path>) -> Self {
        Self {
            root: root.map(Path::to_path_buf),
        }
    }

    pub fn resolve(&self, uri: &str) -> Option<Result<Vec<u8>, String>> {
        if let Some(decoded) = glb::decode_data_uri(uri) {
            return Some(decoded);
        }
        let rel = normalize_rel_path(&percent_decode(uri))?;
        let root = self.root.as_ref()?;
        let path = root.join(&rel);
        if !path.is_file() {
            return Some(Err(format!("file not found: {}", path.display())));
        }
        Some(fs::read(&path).map_err(|e| format!("{}: {e}", path.display())))
    }
}

fn section<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Loads a .gltf or .glb file, resolving every external reference relative
/// to the file's directory.
pub fn load_path(path: &Path) -> Result<Document> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_slice(&bytes, path.parent())
        .with_context(|| format!("loading {}", path.display()))
}

/// Loads from raw bytes, auto-detecting the GLB container by magic.
pub fn from_slice(bytes: &[u8], base_dir: Option<&Path>) -> Result<Document> {
    if bytes.starts_with(&glb::GLB_MAGIC.to_le_bytes()) {
        let contents = glb::parse_glb(bytes)?;
        from_json(contents.json, contents.binary_chunks, base_dir)
    } else {
        let json: Value = serde_json::from_slice(bytes).map_err(LoadError::JsonParse)?;
        from_json(json, Vec::new(), base_dir)
    }
}

/// Builds the typed document from parsed glTF JSON. Fatal only on a cyclic
/// node graph; every other defect downgrades to a warning and a skipped or
/// defaulted entity.
pub fn from_json(
    json: Value,
    binary_chunks: Vec<Vec<u8>>,
    base_dir: Option<&Path>,
) -> Result<Document> {
    let mut doc = Document::default();
    let resolver = AssetResolver::new(base_dir);

    if let Some(asset) = json.get("asset") {
        doc.asset_version = crate::document::str_field(asset, "version");
        doc.asset_generator = crate::document::str_field(asset, "generator");
    }
    if !doc.asset_version.starts_with('2') {
        doc.warn(format!(
            "asset version {:?} is not 2.x; attempting to load anyway",
            doc.asset_version
        ));
    }

    load_buffers(&mut doc, &json, &binary_chunks, &resolver);
    doc.buffer_views = section(&json, "bufferViews")
        .iter()
        .map(BufferView::from_json)
        .collect();
    let mut malformed_accessors = 0usize;
    doc.accessors = section(&json, "accessors")
        .iter()
        .map(|v| {
            Accessor::from_json(v).unwrap_or_else(|| {
                // Placeholder keeps later accessor indices aligned.
                malformed_accessors += 1;
                Accessor::default()
            })
        })
        .collect();
    if malformed_accessors > 0 {
        doc.warn(format!(
            "{malformed_accessors} malformed accessor(s) replaced with inert placeholders"
        ));
    }

    doc.images = section(&json, "images").iter().map(Image::from_json).collect();
    doc.textures = section(&json, "textures").iter().map(Texture::from_json).collect();
    doc.samplers = section(&json, "samplers").iter().map(Sampler::from_json).collect();
    doc.materials = section(&json, "materials").iter().map(Material::from_json).collect();
    doc.meshes = section(&json, "meshes").iter().map(Mesh::from_json).collect();
    doc.nodes = section(&json, "nodes").iter().map(Node::from_json).collect();
    doc.scenes = section(&json, "scenes").iter().map(Scene::from_json).collect();
    doc.cameras = section(&json, "cameras").iter().map(Camera::from_json).collect();
    doc.skins = section(&json, "skins").iter().map(Skin::from_json).collect();
    doc.animations = section(&json, "animations").iter().map(Animation::from_json).collect();
    doc.scene = crate::document::index(&json, "scene");

    if let Some(ext) = json.get("extensions") {
        doc.lights = ext
            .get("KHR_lights_punctual")
            .map(|l| section(l, "lights").iter().map(Light::from_json).collect())
            .unwrap_or_default();
        doc.image_based_lights = ext
            .get("EXT_lights_image_based")
            .map(|l| {
                section(l, "lights")
                    .iter()
                    .map(ImageBasedLight::from_json)
                    .collect()
            })
            .unwrap_or_default();
        if let Some(variants) = ext.get("KHR_materials_variants") {
            load_variants(&mut doc, variants);
        }
    }

    // Every document carries a reserved fallback material and sampler at
    // the tail of the lists so unassigned references stay index-based.
    doc.materials.push(Material::default());
    doc.default_material = doc.materials.len() - 1;
    doc.samplers.push(Sampler::default());
    doc.default_sampler = doc.samplers.len() - 1;

    inline_image_uris(&mut doc, &resolver);
    assign_parents(&mut doc);
    detect_cycles(&doc)?;

    for skin in &mut doc.skins {
        skin.resolve_inverse_bind(&doc.accessors, &doc.buffer_views, &doc.buffers);
    }
    for mesh in &mut doc.meshes {
        for primitive in &mut mesh.primitives {
            primitive.compute_centroid(&doc.accessors, &doc.buffer_views, &doc.buffers);
        }
    }
    doc.disjoint_animations = animation::compute_disjoint_table(&doc.animations);

    Ok(doc)
}

fn load_buffers(doc: &mut Document, json: &Value, chunks: &[Vec<u8>], resolver: &AssetResolver) {
    for (i, v) in section(json, "buffers").iter().enumerate() {
        let byte_length = v
            .get("byteLength")
            .and_then(|x| x.as_u64())
            .unwrap_or(0) as usize;
        let uri = v.get("uri").and_then(|x| x.as_str()).map(str::to_string);

        let data = match &uri {
            // A bufferless entry binds to the GLB binary chunk by position.
            None => match chunks.get(i) {
                Some(chunk) => chunk.clone(),
                None => {
                    doc.warn(format!("buffer {i} has no uri and no binary chunk"));
                    Vec::new()
                }
            },
            Some(uri) => match resolver.resolve(uri) {
                Some(Ok(bytes)) => bytes,
                Some(Err(message)) => {
                    doc.warn(format!("buffer {i} unresolved: {message}"));
                    Vec::new()
                }
                None => {
                    doc.warn(format!("buffer {i} has an unusable uri"));
                    Vec::new()
                }
            },
        };

        if !data.is_empty() && data.len() < byte_length {
            doc.warn(format!(
                "buffer {i} is {} bytes, shorter than declared {byte_length}",
                data.len()
            ));
        }
        doc.buffers.push(Buffer {
            uri,
            byte_length,
            data,
        });
    }
}

/// Moves file- and data-URI image payloads into buffer storage so the rest
/// of the pipeline only ever reads images through buffer views.
fn inline_image_uris(doc: &mut Document, resolver: &AssetResolver) {
    for i in 0..doc.images.len() {
        let Some(uri) = doc.images[i].uri.clone() else {
            continue;
        };
        match resolver.resolve(&uri) {
            Some(Ok(bytes)) => {
                let byte_length = bytes.len();
                doc.buffers.push(Buffer {
                    uri: None,
                    byte_length,
                    data: bytes,
                });
                doc.buffer_views.push(BufferView {
                    buffer: doc.buffers.len() - 1,
                    byte_offset: 0,
                    byte_length,
                    byte_stride: None,
                });
                let image = &mut doc.images[i];
                image.buffer_view = Some(doc.buffer_views.len() - 1);
                image.uri = None;
            }
            Some(Err(message)) => doc.warn(format!("image {i} unresolved: {message}")),
            None => doc.warn(format!("image {i} has an unusable uri")),
        }
    }
}

/// Raw encoded bytes of an image, read through its buffer view.
pub fn image_bytes(doc: &Document, image: usize) -> Option<&[u8]> {
    let view = doc
        .buffer_views
        .get(doc.images.get(image)?.buffer_view?)?;
    let buffer = doc.buffers.get(view.buffer)?;
    buffer
        .data
        .get(view.byte_offset..view.byte_offset + view.byte_length)
}

fn load_variants(doc: &mut Document, ext: &Value) {
    for v in section(ext, "variants") {
        let base = crate::document::str_field(v, "name");
        let mut name = base.clone();
        let mut n = 2;
        while doc.variants.contains(&name) {
            name = format!("{base} #{n}");
            n += 1;
        }
        if name != base {
            doc.warn(format!("duplicate variant name {base:?} renamed to {name:?}"));
        }
        doc.variants.push(name);
    }
}

fn assign_parents(doc: &mut Document) {
    let mut parents: Vec<Option<usize>> = vec![None; doc.nodes.len()];
    let mut warnings = Vec::new();
    for (id, node) in doc.nodes.iter().enumerate() {
        for &child in &node.children {
            if child >= doc.nodes.len() {
                warnings.push(format!("node {id} lists dangling child {child}"));
                continue;
            }
            if let Some(previous) = parents[child] {
                warnings.push(format!(
                    "node {child} has multiple parents ({previous} and {id}); keeping the first"
                ));
            } else {
                parents[child] = Some(id);
            }
        }
    }
    for (node, parent) in doc.nodes.iter_mut().zip(parents) {
        node.parent = parent;
    }
    for w in warnings {
        doc.warn(w);
    }
}

/// A cyclic node graph breaks every traversal invariant downstream, so it
/// is the one structural defect that fails the whole load.
fn detect_cycles(doc: &Document) -> Result<(), LoadError> {
    const UNSEEN: u8 = 0;
    const OPEN: u8 = 1;
    const DONE: u8 = 2;
    let mut state = vec![UNSEEN; doc.nodes.len()];

    for root in 0..doc.nodes.len() {
        if state[root] != UNSEEN {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        state[root] = OPEN;
        while let Some(&mut (id, ref mut next_child)) = stack.last_mut() {
            let children = &doc.nodes[id].children;
            if *next_child >= children.len() {
                state[id] = DONE;
                stack.pop();
                continue;
            }
            let child = children[*next_child];
            *next_child += 1;
            if child >= doc.nodes.len() {
                continue;
            }
            match state[child] {
                OPEN => return Err(LoadError::NodeCycle(child)),
                UNSEEN => {
                    state[child] = OPEN;
                    stack.push((child, 0));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::json;

    fn data_uri(bytes: &[u8]) -> String {
        format!(
            "data:application/octet-stream;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    #[test]
    fn loads_minimal_document_with_defaults_appended() {
        let json = json!({
            "asset": {"version": "2.0"},
            "scenes": [{"nodes": [0]}],
            "nodes": [{"mesh": 0}],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 1, "type": "VEC3"}
            ],
            "bufferViews": [{"buffer": 0, "byteLength": 12}],
            "buffers": [{"uri": data_uri(&[0u8; 12]), "byteLength": 12}],
        });

        let doc = from_json(json, Vec::new(), None).expect("load");
        assert_eq!(doc.buffers[0].data.len(), 12);
        assert_eq!(doc.default_material, doc.materials.len() - 1);
        assert_eq!(doc.default_sampler, doc.samplers.len() - 1);
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn missing_buffer_warns_but_loads() {
        let json = json!({
            "asset": {"version": "2.0"},
            "buffers": [{"uri": "missing.bin", "byteLength": 4}],
        });
        let doc = from_json(json, Vec::new(), None).expect("load");
        assert!(doc.buffers[0].data.is_empty());
        assert!(!doc.warnings.is_empty());
    }

    #[test]
    fn external_buffer_resolves_against_base_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("payload.bin"), [1u8, 2, 3, 4]).expect("write");
        let json = json!({
            "asset": {"version": "2.0"},
            "buffers": [{"uri": "payload.bin", "byteLength": 4}],
        });
        let doc = from_json(json, Vec::new(), Some(dir.path())).expect("load");
        assert_eq!(doc.buffers[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn cyclic_node_graph_is_fatal() {
        let json = json!({
            "asset": {"version": "2.0"},
            "nodes": [
                {"children": [1]},
                {"children": [0]},
            ],
        });
        let err = from_json(json, Vec::new(), None).expect_err("cycle");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn duplicate_variant_names_are_renamed() {
        let json = json!({
            "asset": {"version": "2.0"},
            "extensions": {
                "KHR_materials_variants": {
                    "variants": [{"name": "worn"}, {"name": "worn"}, {"name": "worn"}]
                }
            },
        });
        let doc = from_json(json, Vec::new(), None).expect("load");
        assert_eq!(doc.variants, vec!["worn", "worn #2", "worn #3"]);
    }

    #[test]
    fn glb_binary_chunk_binds_to_bufferless_entry() {
        let json = json!({
            "asset": {"version": "2.0"},
            "buffers": [{"byteLength": 4}],
        });
        let bytes = crate::glb::build_glb(&json, Some(&[9u8, 8, 7, 6]));
        let doc = from_slice(&bytes, None).expect("load");
        assert_eq!(doc.buffers[0].data, vec![9, 8, 7, 6]);
    }

    #[test]
    fn image_uri_is_inlined_into_buffer_storage() {
        let json = json!({
            "asset": {"version": "2.0"},
            "images": [{"uri": data_uri(&[0xFF, 0xD8, 0xFF])}],
        });
        let doc = from_json(json, Vec::new(), None).expect("load");
        assert!(doc.images[0].uri.is_none());
        assert_eq!(image_bytes(&doc, 0), Some(&[0xFF, 0xD8, 0xFF][..]));
    }

    #[test]
    fn glb_scene_loads_and_classifies_opaque() {
        let json = json!({
            "asset": {"version": "2.0"},
            "scenes": [{"nodes": [0]}],
            "nodes": [{"mesh": 0}],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "material": 0}]}],
            "materials": [{"pbrMetallicRoughness": {"baseColorFactor": [1, 0, 0, 1]}}],
            "accessors": [{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"}],
            "bufferViews": [{"buffer": 0, "byteLength": 36}],
            "buffers": [{"byteLength": 36}],
        });
        let bytes = crate::glb::build_glb(&json, Some(&[0u8; 36]));
        let mut doc = from_slice(&bytes, None).expect("load");

        // One authored material plus the appended default.
        assert_eq!(doc.materials.len(), 2);

        let roots = doc.scenes[0].nodes.clone();
        crate::node::update_world_transforms(
            &mut doc.nodes,
            &roots,
            glam::Mat4::IDENTITY,
            None,
        );
        assert_eq!(doc.nodes[0].world, glam::Mat4::IDENTITY);

        let plan = crate::draw_list::build_draw_plan(&doc, None, None, true);
        assert_eq!(plan.opaque.len(), 1);
        assert!(plan.transparent.is_empty() && plan.transmission.is_empty());
    }

    #[test]
    fn multiple_parents_keep_first_and_warn() {
        let json = json!({
            "asset": {"version": "2.0"},
            "nodes": [
                {"children": [2]},
                {"children": [2]},
                {},
            ],
        });
        let doc = from_json(json, Vec::new(), None).expect("load");
        assert_eq!(doc.nodes[2].parent, Some(0));
        assert!(doc.warnings.iter().any(|w| w.contains("multiple parents")));
    }
}
