use crate::accessor::{Accessor, Buffer, BufferView};
use crate::node::Node;
use glam::Mat4;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct Skin {
    pub name: String,
    pub joints: Vec<usize>,
    pub skeleton: Option<usize>,
    pub inverse_bind_accessor: Option<usize>,
    /// Resolved at load; identity per joint when the accessor is absent.
    pub inverse_bind_matrices: Vec<Mat4>,
}

impl Skin {
    pub fn from_json(v: &Value) -> Self {
        Self {
            name: crate::document::str_field(v, "name"),
            joints: v
                .get("joints")
                .and_then(|j| j.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|i| i.as_u64().map(|i| i as usize))
                        .collect()
                })
                .unwrap_or_default(),
            skeleton: crate::document::index(v, "skeleton"),
            inverse_bind_accessor: crate::document::index(v, "inverseBindMatrices"),
            inverse_bind_matrices: Vec::new(),
        }
    }

    pub fn resolve_inverse_bind(
        &mut self,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) {
        let mut matrices = Vec::with_capacity(self.joints.len());
        let floats = self
            .inverse_bind_accessor
            .and_then(|i| accessors.get(i))
            .and_then(|a| a.read_floats(views, buffers));
        if let Some(floats) = floats {
            for chunk in floats.chunks_exact(16) {
                matrices.push(Mat4::from_cols_slice(chunk));
            }
        }
        matrices.resize(self.joints.len(), Mat4::IDENTITY);
        self.inverse_bind_matrices = matrices;
    }

    /// Per-joint matrix pairs for one skinned mesh instance:
    /// `inverse(mesh world) × joint world × inverse bind`, plus the matching
    /// normal matrix. Dangling joints contribute identity.
    pub fn joint_matrices(&self, nodes: &[Node], mesh_world: Mat4) -> Vec<(Mat4, Mat4)> {
        let inverse_mesh_world = mesh_world.inverse();
        self.joints
            .iter()
            .enumerate()
            .map(|(i, &joint)| {
                let joint_world = nodes.get(joint).map(|n| n.world).unwrap_or(Mat4::IDENTITY);
                let ibm = self
                    .inverse_bind_matrices
                    .get(i)
                    .copied()
                    .unwrap_or(Mat4::IDENTITY);
                let jm = inverse_mesh_world * joint_world * ibm;
                (jm, jm.inverse().transpose())
            })
            .collect()
    }
}

/// Joint matrices packed for texture upload: each joint occupies 8 RGBA
/// float texels, one matrix row per texel (joint matrix rows then normal
/// matrix rows).
#[derive(Debug, Clone, PartialEq)]
pub struct JointTexture {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<f32>,
}

pub fn build_joint_texture(matrices: &[(Mat4, Mat4)]) -> JointTexture {
    let texels = matrices.len() * 8;
    let width = (texels as f32).sqrt().ceil().max(1.0) as usize;
    let height = texels.div_ceil(width).max(1);

    let mut pixels = Vec::with_capacity(width * height * 4);
    for (joint, normal) in matrices {
        pixels.extend_from_slice(&joint.transpose().to_cols_array());
        pixels.extend_from_slice(&normal.transpose().to_cols_array());
    }
    pixels.resize(width * height * 4, 0.0);

    JointTexture {
        width,
        height,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::update_world_transforms;
    use glam::Vec3;
    use serde_json::json;

    #[test]
    fn missing_inverse_bind_defaults_to_identity() {
        let mut skin = Skin::from_json(&json!({"joints": [0, 1, 2]}));
        skin.resolve_inverse_bind(&[], &[], &[]);
        assert_eq!(skin.inverse_bind_matrices.len(), 3);
        assert!(skin.inverse_bind_matrices.iter().all(|m| *m == Mat4::IDENTITY));
    }

    #[test]
    fn joint_matrix_cancels_mesh_world() {
        // Joint and mesh share the same world transform with identity bind:
        // the joint matrix collapses to identity.
        let mut nodes = vec![Node {
            translation: crate::material::Animatable::new(Vec3::new(3.0, 1.0, -2.0)),
            ..Node::default()
        }];
        update_world_transforms(&mut nodes, &[0], Mat4::IDENTITY, None);

        let mut skin = Skin::from_json(&json!({"joints": [0]}));
        skin.resolve_inverse_bind(&[], &[], &[]);

        let pairs = skin.joint_matrices(&nodes, nodes[0].world);
        assert_eq!(pairs.len(), 1);
        let diff = (pairs[0].0 * Mat4::IDENTITY).to_cols_array();
        let identity = Mat4::IDENTITY.to_cols_array();
        for (a, b) in diff.iter().zip(identity.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn joint_texture_dimensions_cover_all_texels() {
        for joint_count in [1usize, 2, 7, 33, 64] {
            let matrices = vec![(Mat4::IDENTITY, Mat4::IDENTITY); joint_count];
            let tex = build_joint_texture(&matrices);
            let needed = joint_count * 8;
            assert!(tex.width * tex.height >= needed);
            assert_eq!(tex.width, (needed as f32).sqrt().ceil() as usize);
            assert_eq!(tex.pixels.len(), tex.width * tex.height * 4);
        }
    }

    #[test]
    fn joint_texture_packs_rows_not_columns() {
        let jm = Mat4::from_translation(Vec3::new(9.0, 8.0, 7.0));
        let tex = build_joint_texture(&[(jm, Mat4::IDENTITY)]);
        // Each texel is one matrix row, so the translation sits in the rows'
        // w components rather than in a trailing column texel.
        assert_eq!(&tex.pixels[0..4], &[1.0, 0.0, 0.0, 9.0][..]);
        assert_eq!(&tex.pixels[4..8], &[0.0, 1.0, 0.0, 8.0][..]);
        assert_eq!(&tex.pixels[8..12], &[0.0, 0.0, 1.0, 7.0][..]);
        // Texel 4 starts the normal matrix.
        assert_eq!(&tex.pixels[16..20], &[1.0, 0.0, 0.0, 0.0][..]);
    }
}
