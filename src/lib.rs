use anyhow::{Context, Result};

pub mod accessor;
pub mod animation;
pub mod cli;
pub mod composer;
pub mod document;
pub mod draw_list;
pub mod error;
pub mod glb;
pub mod gpu_backend;
pub mod loader;
pub mod material;
pub mod mesh;
pub mod node;
pub mod skin;
pub mod view_state;

use cli::{Cli, Commands};
use document::Document;
use gpu_backend::{RecordingBackend, StdImageDecoder};
use view_state::{RenderParams, State, View, decode_image_sizes, render_frame};

fn load_any(path: &std::path::Path) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|source| error::LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if !bytes.starts_with(&glb::GLB_MAGIC.to_le_bytes())
        && let Ok(json) = serde_json::from_slice::<serde_json::Value>(&bytes)
        && composer::is_composition(&json)
    {
        return composer::compose_json(&json, path.parent())
            .with_context(|| format!("composing {}", path.display()));
    }
    loader::from_slice(&bytes, path.parent())
        .with_context(|| format!("loading {}", path.display()))
}

fn document_report(doc: &Document, full: bool) -> serde_json::Value {
    let mut out = serde_json::json!({
        "asset_version": &doc.asset_version,
        "asset_generator": &doc.asset_generator,
        "counts": {
            "nodes": doc.nodes.len(),
            "meshes": doc.meshes.len(),
            "materials": doc.materials.len(),
            "accessors": doc.accessors.len(),
            "buffers": doc.buffers.len(),
            "textures": doc.textures.len(),
            "images": doc.images.len(),
            "skins": doc.skins.len(),
            "animations": doc.animations.len(),
            "cameras": doc.cameras.len(),
            "lights": doc.lights.len(),
            "scenes": doc.scenes.len(),
        },
        "default_scene": doc.default_scene().map(|s| s.name.clone()),
        "variants": &doc.variants,
        "warnings": &doc.warnings,
    });

    if full {
        let nodes: Vec<serde_json::Value> = doc
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                serde_json::json!({
                    "index": i,
                    "name": &n.name,
                    "parent": n.parent,
                    "children": &n.children,
                    "mesh": n.mesh,
                    "skin": n.skin,
                    "camera": n.camera,
                    "light": n.light,
                    "asset": &n.asset_marker,
                })
            })
            .collect();
        let materials: Vec<serde_json::Value> = doc
            .materials
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": &m.name,
                    "pipeline": m.pipeline,
                    "alpha_mode": m.alpha_mode,
                    "double_sided": m.double_sided,
                    "transmission": m.has_transmission(),
                })
            })
            .collect();
        let images: Vec<serde_json::Value> = doc
            .images
            .iter()
            .map(|i| {
                serde_json::json!({
                    "name": &i.name,
                    "mime_type": &i.mime_type,
                    "size": i.size,
                })
            })
            .collect();
        out["nodes"] = serde_json::Value::Array(nodes);
        out["materials"] = serde_json::Value::Array(materials);
        out["images"] = serde_json::Value::Array(images);
    }
    out
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Inspect {
            asset,
            full,
            no_decode,
        } => {
            let mut doc = load_any(&asset)?;
            if !no_decode {
                decode_image_sizes(&mut doc, &StdImageDecoder);
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&document_report(&doc, full))?
            );
            Ok(())
        }
        Commands::Animations { asset } => {
            let mut doc = load_any(&asset)?;
            let mut rows = Vec::new();
            for i in 0..doc.animations.len() {
                let Document {
                    animations,
                    accessors,
                    buffer_views,
                    buffers,
                    disjoint_animations,
                    ..
                } = &mut doc;
                let duration = animations[i].max_time(accessors, buffer_views, buffers);
                let anim = &animations[i];
                let mut targets: Vec<serde_json::Value> = anim
                    .target_set()
                    .into_iter()
                    .map(|(node, path)| serde_json::json!({"node": node, "path": path}))
                    .collect();
                targets.sort_by_key(|t| t.to_string());
                rows.push(serde_json::json!({
                    "index": i,
                    "name": &anim.name,
                    "channels": anim.channels.len(),
                    "duration": duration,
                    "targets": targets,
                    "compatible_with": disjoint_animations.get(i),
                }));
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "animations": rows,
                    "warnings": &doc.warnings,
                }))?
            );
            Ok(())
        }
        Commands::Frame {
            asset,
            time,
            frames,
            frame_step,
            camera_node,
            variant,
            animations,
            no_fallback_lights,
            no_skinning,
            tone_mapping,
            calls,
        } => {
            let doc = load_any(&asset)?;
            let active_variant = match &variant {
                Some(name) => match doc.variants.iter().position(|v| v == name) {
                    Some(index) => Some(index),
                    None => {
                        eprintln!("[warn] unknown variant {name:?}, using default materials");
                        None
                    }
                },
                None => None,
            };

            let mut view = View::new(RecordingBackend::default());
            let mut state = State::new(doc);
            state.camera_node = camera_node;
            state.params = RenderParams {
                tone_mapping: tone_mapping.into(),
                use_directional_fallback: !no_fallback_lights,
                skinning: !no_skinning,
                active_variant,
                ..RenderParams::default()
            };
            for index in animations {
                if !state.try_activate_animation(index) {
                    eprintln!("[warn] animation {index} not activated (missing or conflicting)");
                }
            }

            let mut plan = None;
            for frame in 0..frames.max(1) {
                plan = render_frame(&mut view, &mut state, time + frame as f32 * frame_step);
            }
            let plan = plan.unwrap_or_default();

            let mut out = serde_json::json!({
                "frames": frames.max(1),
                "draws": plan.draw_count(),
                "buckets": {
                    "opaque": plan.opaque.len(),
                    "transmission": plan.transmission.len(),
                    "transparent": plan.transparent.len(),
                },
                "needs_opaque_capture": plan.needs_opaque_capture,
                "lights": plan.lights.len(),
                "uses_fallback_lights": plan.uses_fallback_lights,
                "shader_permutations": view.cached_permutations(),
                "compiles": view.backend.compiles,
                "ordered": plan.ordered().collect::<Vec<_>>(),
            });
            if calls {
                out["calls"] = serde_json::json!(&view.backend.calls);
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::Compose { composition, full } => {
            let doc = composer::compose_path(&composition)?;
            let wrappers: Vec<serde_json::Value> = doc
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| {
                    n.asset_marker.as_ref().map(|marker| {
                        serde_json::json!({
                            "node": i,
                            "asset": marker,
                            "children": n.children.len(),
                        })
                    })
                })
                .collect();
            let mut out = document_report(&doc, full);
            out["merged_assets"] = serde_json::Value::Array(wrappers);
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
    }
}
