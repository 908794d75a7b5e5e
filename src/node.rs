use crate::material::Animatable;
use glam::{Mat4, Quat, Vec3};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillboardAxis {
    X,
    Y,
    Z,
}

/// Camera-facing behavior for a node. Optionally constrained to spin about
/// one axis, optionally distance-scaled so the on-screen size stays put.
#[derive(Debug, Clone, Copy)]
pub struct Billboard {
    pub axis: Option<BillboardAxis>,
    pub fixed_size: bool,
}

/// How a composed asset's punctual lights apply: to the whole scene or only
/// within the asset's own subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LightScope {
    #[default]
    Scene,
    Asset,
}

/// View matrix plus world position of the camera driving the current frame.
#[derive(Debug, Clone, Copy)]
pub struct CameraPose {
    pub view: Mat4,
    pub position: Vec3,
}

impl CameraPose {
    pub fn rotation(&self) -> Quat {
        // View is the inverse of the camera's world transform; the camera's
        // world rotation is the inverse of the view rotation.
        let (_, rotation, _) = self.view.to_scale_rotation_translation();
        rotation.inverse()
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    pub camera: Option<usize>,
    pub light: Option<usize>,
    pub translation: Animatable<Vec3>,
    pub rotation: Animatable<Quat>,
    pub scale: Animatable<Vec3>,
    /// Authored matrix, kept alongside its TRS decomposition. Used directly
    /// while no animation override is active.
    pub authored_matrix: Option<Mat4>,
    pub billboard: Option<Billboard>,
    /// Composer bookkeeping: set on synthetic wrapper nodes, never a core
    /// glTF property.
    pub asset_marker: Option<String>,
    pub light_scope: LightScope,
    pub environment_override: Option<String>,
    // Runtime state below, refreshed by the frame evaluator.
    pub world: Mat4,
    pub inverse_world: Mat4,
    pub normal_matrix: Mat4,
    pub(crate) cached_local: Mat4,
    pub(crate) changed: bool,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            name: String::new(),
            children: Vec::new(),
            parent: None,
            mesh: None,
            skin: None,
            camera: None,
            light: None,
            translation: Animatable::new(Vec3::ZERO),
            rotation: Animatable::new(Quat::IDENTITY),
            scale: Animatable::new(Vec3::ONE),
            authored_matrix: None,
            billboard: None,
            asset_marker: None,
            light_scope: LightScope::default(),
            environment_override: None,
            world: Mat4::IDENTITY,
            inverse_world: Mat4::IDENTITY,
            normal_matrix: Mat4::IDENTITY,
            cached_local: Mat4::IDENTITY,
            changed: true,
        }
    }
}

fn floats(v: Option<&Value>) -> Option<Vec<f32>> {
    v?.as_array()
        .map(|arr| arr.iter().filter_map(|n| n.as_f64()).map(|n| n as f32).collect())
}

fn index(v: &Value, key: &str) -> Option<usize> {
    v.get(key).and_then(|x| x.as_u64()).map(|x| x as usize)
}

impl Node {
    pub fn from_json(v: &Value) -> Self {
        let mut node = Self {
            name: v
                .get("name")
                .and_then(|x| x.as_str())
                .unwrap_or_default()
                .to_string(),
            children: v
                .get("children")
                .and_then(|c| c.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|i| i.as_u64().map(|i| i as usize))
                        .collect()
                })
                .unwrap_or_default(),
            mesh: index(v, "mesh"),
            skin: index(v, "skin"),
            camera: index(v, "camera"),
            ..Self::default()
        };

        if let Some(m) = floats(v.get("matrix")).filter(|m| m.len() == 16) {
            let matrix = Mat4::from_cols_slice(&m);
            let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
            node.translation = Animatable::new(translation);
            node.rotation = Animatable::new(rotation);
            node.scale = Animatable::new(scale);
            node.authored_matrix = Some(matrix);
        } else {
            if let Some(t) = floats(v.get("translation")).filter(|t| t.len() >= 3) {
                node.translation = Animatable::new(Vec3::new(t[0], t[1], t[2]));
            }
            if let Some(r) = floats(v.get("rotation")).filter(|r| r.len() >= 4) {
                node.rotation =
                    Animatable::new(Quat::from_xyzw(r[0], r[1], r[2], r[3]).normalize());
            }
            if let Some(s) = floats(v.get("scale")).filter(|s| s.len() >= 3) {
                node.scale = Animatable::new(Vec3::new(s[0], s[1], s[2]));
            }
        }

        if let Some(ext) = v.get("extensions") {
            node.light = ext
                .get("KHR_lights_punctual")
                .and_then(|l| l.get("light"))
                .and_then(|x| x.as_u64())
                .map(|x| x as usize);
            if let Some(bb) = ext.get("KITSUNE_node_billboard") {
                node.billboard = Some(Billboard {
                    axis: match bb.get("axis").and_then(|x| x.as_str()) {
                        Some("x") => Some(BillboardAxis::X),
                        Some("y") => Some(BillboardAxis::Y),
                        Some("z") => Some(BillboardAxis::Z),
                        _ => None,
                    },
                    fixed_size: bb
                        .get("fixedSize")
                        .and_then(|x| x.as_bool())
                        .unwrap_or(false),
                });
            }
        }

        node
    }

    pub fn has_animation_override(&self) -> bool {
        self.translation.is_overridden()
            || self.rotation.is_overridden()
            || self.scale.is_overridden()
    }

    pub fn set_translation_override(&mut self, value: Vec3) {
        self.translation.set_override(value);
        self.changed = true;
    }

    pub fn set_rotation_override(&mut self, value: Quat) {
        self.rotation.set_override(value);
        self.changed = true;
    }

    pub fn set_scale_override(&mut self, value: Vec3) {
        self.scale.set_override(value);
        self.changed = true;
    }

    pub fn clear_translation_override(&mut self) {
        if self.translation.is_overridden() {
            self.changed = true;
        }
        self.translation.clear_override();
    }

    pub fn clear_rotation_override(&mut self) {
        if self.rotation.is_overridden() {
            self.changed = true;
        }
        self.rotation.clear_override();
    }

    pub fn clear_scale_override(&mut self) {
        if self.scale.is_overridden() {
            self.changed = true;
        }
        self.scale.clear_override();
    }

    pub fn clear_transform_overrides(&mut self) {
        if self.has_animation_override() {
            self.changed = true;
        }
        self.translation.clear_override();
        self.rotation.clear_override();
        self.scale.clear_override();
    }

    /// Bakes the current local transform into the authored matrix and
    /// resets TRS to identity. Composer `global` placement uses this with
    /// the inherited world transform.
    pub fn bake_matrix(&mut self, matrix: Mat4) {
        self.authored_matrix = Some(matrix);
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        self.translation = Animatable::new(translation);
        self.rotation = Animatable::new(rotation);
        self.scale = Animatable::new(scale);
        self.changed = true;
    }

    pub fn strip_transform(&mut self) {
        self.authored_matrix = None;
        self.translation = Animatable::new(Vec3::ZERO);
        self.rotation = Animatable::new(Quat::IDENTITY);
        self.scale = Animatable::new(Vec3::ONE);
        self.changed = true;
    }

    /// Authored matrix while untouched by animation, TRS composition
    /// (scale, then rotate, then translate) otherwise. Cached against the
    /// dirty flag.
    pub fn local_transform(&mut self) -> Mat4 {
        if self.changed {
            self.cached_local = match (self.authored_matrix, self.has_animation_override()) {
                (Some(matrix), false) => matrix,
                _ => Mat4::from_scale_rotation_translation(
                    self.scale.value(),
                    self.rotation.value().normalize(),
                    self.translation.value(),
                ),
            };
            self.changed = false;
        }
        self.cached_local
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub name: String,
    pub nodes: Vec<usize>,
    /// Transform of the implicit parent of root nodes.
    pub root_transform: Mat4,
}

impl Scene {
    pub fn from_json(v: &Value) -> Self {
        Self {
            name: v
                .get("name")
                .and_then(|x| x.as_str())
                .unwrap_or_default()
                .to_string(),
            nodes: v
                .get("nodes")
                .and_then(|n| n.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|i| i.as_u64().map(|i| i as usize))
                        .collect()
                })
                .unwrap_or_default(),
            root_transform: Mat4::IDENTITY,
        }
    }
}

/// Flattens the trees under `roots` to a node-id list, parents before
/// children. The visited set makes a malformed cyclic graph terminate
/// instead of looping.
pub fn gather_nodes(nodes: &[Node], roots: &[usize]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = nodes.get(id) else {
            eprintln!("[warn] dangling node index {id} skipped during gather");
            continue;
        };
        out.push(id);
        for &child in node.children.iter().rev() {
            stack.push(child);
        }
    }
    out
}

fn billboard_world(base: Mat4, billboard: Billboard, camera: &CameraPose) -> Mat4 {
    let (scale, _, translation) = base.to_scale_rotation_translation();

    let rotation = match billboard.axis {
        None => camera.rotation(),
        Some(axis) => {
            let axis_vec = match axis {
                BillboardAxis::X => Vec3::X,
                BillboardAxis::Y => Vec3::Y,
                BillboardAxis::Z => Vec3::Z,
            };
            let mut to_camera = camera.position - translation;
            to_camera -= axis_vec * to_camera.dot(axis_vec);
            if to_camera.length_squared() < 1e-10 {
                camera.rotation()
            } else {
                let to_camera = to_camera.normalize();
                let angle = match axis {
                    BillboardAxis::Y => to_camera.x.atan2(to_camera.z),
                    BillboardAxis::X => to_camera.z.atan2(to_camera.y),
                    BillboardAxis::Z => to_camera.y.atan2(to_camera.x),
                };
                Quat::from_axis_angle(axis_vec, angle)
            }
        }
    };

    let scale = if billboard.fixed_size {
        scale * translation.distance(camera.position).max(1e-6)
    } else {
        scale
    };

    Mat4::from_scale_rotation_translation(scale, rotation, translation)
}

/// Recomputes world, inverse-world and normal matrices for every node
/// reachable from `roots`, parents first. Billboard nodes need the active
/// camera and are recomputed every call regardless of dirty state. Singular
/// transforms are not special-cased; their inverse is non-finite and
/// downstream consumers skip those draws.
pub fn update_world_transforms(
    nodes: &mut [Node],
    roots: &[usize],
    root_transform: Mat4,
    camera: Option<&CameraPose>,
) {
    let mut visited = HashSet::new();
    let mut stack: Vec<(usize, Mat4)> = roots
        .iter()
        .rev()
        .map(|&id| (id, root_transform))
        .collect();

    while let Some((id, parent_world)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = nodes.get_mut(id) else {
            continue;
        };

        let mut world = parent_world * node.local_transform();
        if let (Some(billboard), Some(camera)) = (node.billboard, camera) {
            world = billboard_world(world, billboard, camera);
        }
        node.world = world;
        node.inverse_world = world.inverse();
        node.normal_matrix = node.inverse_world.transpose();

        for &child in node.children.iter().rev() {
            stack.push((child, world));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(a: Mat4, b: Mat4) -> bool {
        a.to_cols_array()
            .iter()
            .zip(b.to_cols_array().iter())
            .all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn matrix_decompose_recompose_roundtrip() {
        let authored = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 0.5, 1.5),
            Quat::from_rotation_y(0.7) * Quat::from_rotation_x(-0.3),
            Vec3::new(4.0, -2.0, 9.0),
        );
        let m = authored.to_cols_array().to_vec();
        let mut node = Node::from_json(&json!({"matrix": m}));

        // No override: the authored matrix is used as-is.
        assert!(approx(node.local_transform(), authored));

        // Recomposing the decomposed TRS reproduces the matrix.
        let recomposed = Mat4::from_scale_rotation_translation(
            node.scale.rest(),
            node.rotation.rest(),
            node.translation.rest(),
        );
        assert!(approx(recomposed, authored));
    }

    #[test]
    fn override_beats_authored_matrix() {
        let authored = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let mut node = Node::from_json(&json!({"matrix": authored.to_cols_array().to_vec()}));
        node.set_translation_override(Vec3::new(5.0, 0.0, 0.0));
        let local = node.local_transform();
        assert!((local.w_axis.x - 5.0).abs() < 1e-6);

        node.clear_transform_overrides();
        assert!(approx(node.local_transform(), authored));
    }

    #[test]
    fn world_transform_chains_through_parents() {
        let mut nodes = vec![
            Node {
                children: vec![1],
                translation: Animatable::new(Vec3::new(1.0, 0.0, 0.0)),
                ..Node::default()
            },
            Node {
                translation: Animatable::new(Vec3::new(0.0, 2.0, 0.0)),
                ..Node::default()
            },
        ];
        update_world_transforms(&mut nodes, &[0], Mat4::IDENTITY, None);
        let w = nodes[1].world.w_axis;
        assert!((w.x - 1.0).abs() < 1e-6 && (w.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn gather_survives_cycles() {
        let nodes = vec![
            Node {
                children: vec![1],
                ..Node::default()
            },
            Node {
                // Lists its own parent as a child.
                children: vec![0],
                ..Node::default()
            },
        ];
        let order = gather_nodes(&nodes, &[0]);
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn billboard_faces_camera() {
        let camera = CameraPose {
            view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y),
            position: Vec3::new(0.0, 0.0, 5.0),
        };
        let mut nodes = vec![Node {
            billboard: Some(Billboard {
                axis: None,
                fixed_size: false,
            }),
            rotation: Animatable::new(Quat::from_rotation_y(1.2)),
            ..Node::default()
        }];
        update_world_transforms(&mut nodes, &[0], Mat4::IDENTITY, Some(&camera));
        let (_, rotation, _) = nodes[0].world.to_scale_rotation_translation();
        // Camera at +Z looking at origin: the facing rotation is identity.
        assert!(rotation.angle_between(Quat::IDENTITY) < 1e-4);
    }
}
