use crate::accessor::{Accessor, Buffer, BufferView};
use crate::material::Animatable;
use glam::Vec3;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrawMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl DrawMode {
    fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Points,
            1 => Self::Lines,
            2 => Self::LineLoop,
            3 => Self::LineStrip,
            5 => Self::TriangleStrip,
            6 => Self::TriangleFan,
            _ => Self::Triangles,
        }
    }
}

/// One mapping row from KHR_materials_variants: the listed variant indices
/// select `material` instead of the primitive's authored material.
#[derive(Debug, Clone)]
pub struct VariantMapping {
    pub variants: Vec<usize>,
    pub material: usize,
}

#[derive(Debug, Clone)]
pub struct Primitive {
    /// Attribute semantic ("POSITION", "NORMAL", "TEXCOORD_0", ...) to
    /// accessor index.
    pub attributes: BTreeMap<String, usize>,
    pub indices: Option<usize>,
    pub material: Option<usize>,
    pub mode: DrawMode,
    /// Morph targets, each a semantic → delta-accessor map.
    pub targets: Vec<BTreeMap<String, usize>>,
    pub variant_mappings: Vec<VariantMapping>,
    /// Object-space centroid, filled once after attributes resolve.
    /// Depth-sorting input only, never a culling bound.
    pub centroid: Option<Vec3>,
}

impl Primitive {
    pub fn from_json(v: &Value) -> Self {
        let grab_attributes = |v: &Value| -> BTreeMap<String, usize> {
            v.as_object()
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, idx)| idx.as_u64().map(|i| (k.clone(), i as usize)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let targets = v
            .get("targets")
            .and_then(|t| t.as_array())
            .map(|arr| arr.iter().map(grab_attributes).collect())
            .unwrap_or_default();

        let variant_mappings = v
            .get("extensions")
            .and_then(|e| e.get("KHR_materials_variants"))
            .and_then(|e| e.get("mappings"))
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|row| {
                        let material = row.get("material")?.as_u64()? as usize;
                        let variants = row
                            .get("variants")?
                            .as_array()?
                            .iter()
                            .filter_map(|i| i.as_u64().map(|i| i as usize))
                            .collect();
                        Some(VariantMapping { variants, material })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            attributes: v.get("attributes").map(grab_attributes).unwrap_or_default(),
            indices: v
                .get("indices")
                .and_then(|x| x.as_u64())
                .map(|x| x as usize),
            material: v
                .get("material")
                .and_then(|x| x.as_u64())
                .map(|x| x as usize),
            mode: DrawMode::from_code(v.get("mode").and_then(|x| x.as_u64()).unwrap_or(4)),
            targets,
            variant_mappings,
            centroid: None,
        }
    }

    /// Effective material for the active variant: the mapping table wins
    /// over the authored material, per draw, O(mappings).
    pub fn resolved_material(&self, active_variant: Option<usize>) -> Option<usize> {
        if let Some(variant) = active_variant {
            for mapping in &self.variant_mappings {
                if mapping.variants.contains(&variant) {
                    return Some(mapping.material);
                }
            }
        }
        self.material
    }

    /// Mean of the referenced POSITION vertices (all vertices when the
    /// primitive is unindexed).
    pub fn compute_centroid(
        &mut self,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) {
        let Some(&position) = self.attributes.get("POSITION") else {
            return;
        };
        let Some(accessor) = accessors.get(position) else {
            return;
        };
        let Some(positions) = accessor.read_elements(views, buffers) else {
            return;
        };
        if positions.is_empty() {
            return;
        }

        let pick: Vec<&Vec<f32>> = match self
            .indices
            .and_then(|i| accessors.get(i))
            .and_then(|a| a.read_indices(views, buffers))
        {
            Some(indices) if !indices.is_empty() => indices
                .iter()
                .filter_map(|&i| positions.get(i))
                .collect(),
            _ => positions.iter().collect(),
        };
        if pick.is_empty() {
            return;
        }

        let mut sum = Vec3::ZERO;
        for p in &pick {
            if p.len() >= 3 {
                sum += Vec3::new(p[0], p[1], p[2]);
            }
        }
        self.centroid = Some(sum / pick.len() as f32);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub primitives: Vec<Primitive>,
    /// Morph weights; animated through the override channel like any other
    /// animatable value.
    pub weights: Animatable<Vec<f32>>,
}

impl Mesh {
    pub fn from_json(v: &Value) -> Self {
        let primitives = v
            .get("primitives")
            .and_then(|p| p.as_array())
            .map(|arr| arr.iter().map(Primitive::from_json).collect::<Vec<_>>())
            .unwrap_or_default();

        let mut rest: Vec<f32> = v
            .get("weights")
            .and_then(|w| w.as_array())
            .map(|arr| arr.iter().filter_map(|n| n.as_f64()).map(|n| n as f32).collect())
            .unwrap_or_default();
        let target_count = primitives
            .first()
            .map(|p| p.targets.len())
            .unwrap_or_default();
        if rest.len() < target_count {
            rest.resize(target_count, 0.0);
        }

        Self {
            name: v
                .get("name")
                .and_then(|x| x.as_str())
                .unwrap_or_default()
                .to_string(),
            primitives,
            weights: Animatable::new(rest),
        }
    }

    pub fn current_weights(&self) -> Vec<f32> {
        self.weights.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variant_mapping_substitutes_material() {
        let primitive = Primitive::from_json(&json!({
            "attributes": {"POSITION": 0},
            "material": 1,
            "extensions": {
                "KHR_materials_variants": {
                    "mappings": [
                        {"variants": [0, 2], "material": 5},
                        {"variants": [1], "material": 6},
                    ]
                }
            }
        }));

        assert_eq!(primitive.resolved_material(None), Some(1));
        assert_eq!(primitive.resolved_material(Some(2)), Some(5));
        assert_eq!(primitive.resolved_material(Some(1)), Some(6));
        assert_eq!(primitive.resolved_material(Some(9)), Some(1));
    }

    #[test]
    fn centroid_uses_indexed_vertices() {
        use crate::accessor::{Accessor, Buffer, BufferView};

        let mut data = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 2.0, 0.0, 0.0, 100.0, 100.0, 100.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        for i in [0u16, 1, 0, 1] {
            data.extend_from_slice(&i.to_le_bytes());
        }
        let buffers = vec![Buffer {
            uri: None,
            byte_length: data.len(),
            data,
        }];
        let views = vec![
            BufferView {
                buffer: 0,
                byte_offset: 0,
                byte_length: 36,
                byte_stride: None,
            },
            BufferView {
                buffer: 0,
                byte_offset: 36,
                byte_length: 8,
                byte_stride: None,
            },
        ];
        let accessors = vec![
            Accessor::from_json(
                &json!({"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3"}),
            )
            .unwrap(),
            Accessor::from_json(
                &json!({"bufferView": 1, "componentType": 5123, "count": 4, "type": "SCALAR"}),
            )
            .unwrap(),
        ];

        let mut primitive = Primitive::from_json(&json!({
            "attributes": {"POSITION": 0},
            "indices": 1,
        }));
        primitive.compute_centroid(&accessors, &views, &buffers);

        // Vertex 2 is never referenced by the index buffer.
        let c = primitive.centroid.expect("centroid computed");
        assert!((c - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
    }
}
