use crate::accessor::{Accessor, Buffer, BufferView};
use crate::document::Document;
use glam::Quat;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpolation {
    Step,
    Linear,
    CubicSpline,
}

/// Animation target resolved to a direct node handle at load time; no
/// string-path parsing happens per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetPath {
    Translation,
    Rotation,
    Scale,
    Weights,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub sampler: usize,
    /// None when the authored target node dangled; the channel is inert.
    pub node: Option<usize>,
    pub path: TargetPath,
}

#[derive(Debug, Clone, Default)]
struct SamplerCache {
    keys: Vec<f32>,
    values: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct AnimationSampler {
    pub input: usize,
    pub output: usize,
    pub interpolation: Interpolation,
    /// Interpolation cursor: last hit key index and query time. Reset when
    /// time moves backward (looping, scrubbing).
    cursor_key: usize,
    cursor_t: f32,
    cache: Option<SamplerCache>,
}

impl AnimationSampler {
    pub fn from_json(v: &Value) -> Option<Self> {
        let interpolation = match v.get("interpolation").and_then(|x| x.as_str()) {
            Some("STEP") => Interpolation::Step,
            Some("CUBICSPLINE") => Interpolation::CubicSpline,
            _ => Interpolation::Linear,
        };
        Some(Self {
            input: v.get("input")?.as_u64()? as usize,
            output: v.get("output")?.as_u64()? as usize,
            interpolation,
            cursor_key: 0,
            cursor_t: f32::NEG_INFINITY,
            cache: None,
        })
    }

    fn resolve(
        &mut self,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) -> Option<&SamplerCache> {
        if self.cache.is_none() {
            let keys = accessors.get(self.input)?.read_floats(views, buffers)?;
            let values = accessors.get(self.output)?.read_floats(views, buffers)?;
            if keys.is_empty() || values.is_empty() {
                return None;
            }
            self.cache = Some(SamplerCache { keys, values });
        }
        self.cache.as_ref()
    }

    fn last_key_time(
        &mut self,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) -> Option<f32> {
        self.resolve(accessors, views, buffers)
            .and_then(|c| c.keys.last().copied())
    }

    /// Interpolated value (one element of `components` floats) at time `t`.
    /// A single-key sampler returns its one value at any query time.
    fn sample(
        &mut self,
        t: f32,
        rotation: bool,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) -> Option<Vec<f32>> {
        let interpolation = self.interpolation;
        if t < self.cursor_t {
            self.cursor_key = 0;
        }
        self.cursor_t = t;
        let mut cursor_key = self.cursor_key;

        if self.cache.is_none() {
            let keys = accessors.get(self.input)?.read_floats(views, buffers)?;
            let values = accessors.get(self.output)?.read_floats(views, buffers)?;
            if keys.is_empty() || values.is_empty() {
                return None;
            }
            self.cache = Some(SamplerCache { keys, values });
        }
        let cache = self.cache.as_ref()?;
        let key_count = cache.keys.len();
        let per_key = cache.values.len() / key_count;
        if per_key == 0 {
            return None;
        }
        let components = match interpolation {
            Interpolation::CubicSpline => per_key / 3,
            _ => per_key,
        };

        let element = |key: usize| -> &[f32] {
            let base = match interpolation {
                // Cubic spline keys are (in-tangent, value, out-tangent)
                // triples; the plain value sits in the middle.
                Interpolation::CubicSpline => key * per_key + components,
                _ => key * per_key,
            };
            &cache.values[base..base + components]
        };

        if key_count == 1 || t <= cache.keys[0] {
            self.cursor_key = 0;
            return Some(element(0).to_vec());
        }
        if t >= cache.keys[key_count - 1] {
            self.cursor_key = key_count - 2;
            return Some(element(key_count - 1).to_vec());
        }

        if cursor_key >= key_count - 1 {
            cursor_key = 0;
        }
        while cursor_key + 2 < key_count && cache.keys[cursor_key + 1] < t {
            cursor_key += 1;
        }
        self.cursor_key = cursor_key;

        let t0 = cache.keys[cursor_key];
        let t1 = cache.keys[cursor_key + 1];
        let delta = (t1 - t0).max(1e-9);
        let u = ((t - t0) / delta).clamp(0.0, 1.0);

        let value = match interpolation {
            Interpolation::Step => element(cursor_key).to_vec(),
            Interpolation::Linear => {
                if rotation && components == 4 {
                    let a = quat_from(element(cursor_key));
                    let b = quat_from(element(cursor_key + 1));
                    let q = a.slerp(b, u).normalize();
                    vec![q.x, q.y, q.z, q.w]
                } else {
                    element(cursor_key)
                        .iter()
                        .zip(element(cursor_key + 1))
                        .map(|(a, b)| a + (b - a) * u)
                        .collect()
                }
            }
            Interpolation::CubicSpline => {
                let base0 = cursor_key * per_key;
                let base1 = (cursor_key + 1) * per_key;
                let mut out = Vec::with_capacity(components);
                let u2 = u * u;
                let u3 = u2 * u;
                for c in 0..components {
                    let p0 = cache.values[base0 + components + c];
                    let m0 = cache.values[base0 + 2 * components + c] * delta;
                    let p1 = cache.values[base1 + components + c];
                    let m1 = cache.values[base1 + c] * delta;
                    out.push(
                        (2.0 * u3 - 3.0 * u2 + 1.0) * p0
                            + (u3 - 2.0 * u2 + u) * m0
                            + (-2.0 * u3 + 3.0 * u2) * p1
                            + (u3 - u2) * m1,
                    );
                }
                if rotation && components == 4 {
                    let q = quat_from(&out).normalize();
                    out = vec![q.x, q.y, q.z, q.w];
                }
                out
            }
        };
        Some(value)
    }
}

fn quat_from(v: &[f32]) -> Quat {
    Quat::from_xyzw(v[0], v[1], v[2], v[3]).normalize()
}

#[derive(Debug, Clone)]
pub struct Animation {
    pub name: String,
    pub channels: Vec<Channel>,
    pub samplers: Vec<AnimationSampler>,
    pub(crate) max_time: Option<f32>,
}

impl Animation {
    pub fn from_json(v: &Value) -> Self {
        let samplers = v
            .get("samplers")
            .and_then(|s| s.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(AnimationSampler::from_json)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let channels = v
            .get("channels")
            .and_then(|c| c.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|ch| {
                        let target = ch.get("target")?;
                        let path = match target.get("path").and_then(|x| x.as_str())? {
                            "translation" => TargetPath::Translation,
                            "rotation" => TargetPath::Rotation,
                            "scale" => TargetPath::Scale,
                            "weights" => TargetPath::Weights,
                            _ => return None,
                        };
                        Some(Channel {
                            sampler: ch.get("sampler")?.as_u64()? as usize,
                            node: target
                                .get("node")
                                .and_then(|x| x.as_u64())
                                .map(|x| x as usize),
                            path,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            name: crate::document::str_field(v, "name"),
            channels,
            samplers,
            max_time: None,
        }
    }

    /// Last keyframe time across all channels, computed once.
    pub fn max_time(
        &mut self,
        accessors: &[Accessor],
        views: &[BufferView],
        buffers: &[Buffer],
    ) -> f32 {
        if let Some(t) = self.max_time {
            return t;
        }
        let mut max = 0.0f32;
        for channel in &self.channels {
            if let Some(sampler) = self.samplers.get_mut(channel.sampler)
                && let Some(t) = sampler.last_key_time(accessors, views, buffers)
            {
                max = max.max(t);
            }
        }
        self.max_time = Some(max);
        max
    }

    /// Set of (node, path) pairs this animation writes.
    pub fn target_set(&self) -> HashSet<(usize, TargetPath)> {
        self.channels
            .iter()
            .filter_map(|c| c.node.map(|n| (n, c.path)))
            .collect()
    }
}

/// Advances one animation. `Some(t)` interpolates every channel at `t`
/// (taken modulo the animation's max time, then clamped into the key
/// range); `None` is the pause-and-reset signal that restores rest values
/// on every targeted property.
pub fn advance(doc: &mut Document, animation: usize, time: Option<f32>) {
    let Document {
        animations,
        accessors,
        buffer_views,
        buffers,
        nodes,
        meshes,
        ..
    } = doc;
    let Some(anim) = animations.get_mut(animation) else {
        return;
    };

    let Some(time) = time else {
        for channel in &anim.channels {
            let Some(node) = channel.node.and_then(|n| nodes.get_mut(n)) else {
                continue;
            };
            match channel.path {
                TargetPath::Translation => node.clear_translation_override(),
                TargetPath::Rotation => node.clear_rotation_override(),
                TargetPath::Scale => node.clear_scale_override(),
                TargetPath::Weights => {
                    if let Some(mesh) = node.mesh.and_then(|m| meshes.get_mut(m)) {
                        mesh.weights.clear_override();
                    }
                }
            }
        }
        return;
    };

    let max_time = anim.max_time(accessors, buffer_views, buffers);
    let t = if max_time > 0.0 {
        time.rem_euclid(max_time)
    } else {
        0.0
    };

    // Split borrow: channels describe targets, samplers hold cursors.
    let Animation {
        channels, samplers, ..
    } = anim;
    for channel in channels.iter() {
        let Some(node_index) = channel.node else {
            continue;
        };
        let rotation = channel.path == TargetPath::Rotation;
        let Some(value) = samplers.get_mut(channel.sampler).and_then(|sampler| {
            sampler.sample(t, rotation, accessors, buffer_views, buffers)
        }) else {
            continue;
        };
        let Some(node) = nodes.get_mut(node_index) else {
            continue;
        };

        match channel.path {
            TargetPath::Translation if value.len() >= 3 => {
                node.set_translation_override(glam::Vec3::new(value[0], value[1], value[2]));
            }
            TargetPath::Rotation if value.len() >= 4 => {
                node.set_rotation_override(quat_from(&value));
            }
            TargetPath::Scale if value.len() >= 3 => {
                node.set_scale_override(glam::Vec3::new(value[0], value[1], value[2]));
            }
            TargetPath::Weights => {
                if let Some(mesh) = node.mesh.and_then(|m| meshes.get_mut(m)) {
                    mesh.weights.set_override(value);
                }
            }
            _ => {}
        }
    }
}

/// Precomputes, for every animation, which other animations never write the
/// same (node, path) pair. Symmetric by construction; O(A²·C).
pub fn compute_disjoint_table(animations: &[Animation]) -> Vec<Vec<usize>> {
    let targets: Vec<HashSet<(usize, TargetPath)>> =
        animations.iter().map(|a| a.target_set()).collect();

    (0..animations.len())
        .map(|i| {
            (0..animations.len())
                .filter(|&j| j != i && targets[i].is_disjoint(&targets[j]))
                .collect()
        })
        .collect()
}

/// Playback policy over one or more animations advanced in lockstep:
/// looping or reflecting between `start` and `end`, with speed, offset and
/// a finite or infinite repetition budget.
#[derive(Debug, Clone, Serialize)]
pub struct Clip {
    pub animations: Vec<usize>,
    pub start: f32,
    pub end: f32,
    pub offset: f32,
    pub speed: f32,
    /// −1 = infinite, 0 = disabled.
    pub repetitions: i32,
    pub reverse: bool,
    timestamp: f32,
}

impl Clip {
    pub fn new(animations: Vec<usize>, start: f32, end: f32) -> Self {
        Self {
            animations,
            start,
            end: end.max(start),
            offset: 0.0,
            speed: 1.0,
            repetitions: -1,
            reverse: false,
            timestamp: start,
        }
    }

    /// Advances the clip-local timestamp by `speed × dt` and returns the
    /// animation time to sample, or `None` once the repetition budget is
    /// spent. Boundary overshoot either reflects (reverse mode, negating
    /// speed) or wraps to the opposite bound; the timestamp is always
    /// re-clamped into `[start, end]`.
    pub fn advance(&mut self, dt: f32) -> Option<f32> {
        if self.repetitions == 0 {
            return None;
        }
        let span = (self.end - self.start).max(1e-6);
        self.timestamp += self.speed * dt;

        let mut guard = 0;
        while (self.timestamp > self.end || self.timestamp < self.start) && guard < 64 {
            guard += 1;
            if self.reverse {
                if self.timestamp > self.end {
                    self.timestamp = 2.0 * self.end - self.timestamp;
                    self.speed = -self.speed;
                } else {
                    self.timestamp = 2.0 * self.start - self.timestamp;
                    self.speed = -self.speed;
                    // A full there-and-back counts as one repetition.
                    if self.repetitions > 0 {
                        self.repetitions -= 1;
                        if self.repetitions == 0 {
                            self.timestamp = self.start;
                            break;
                        }
                    }
                }
            } else {
                if self.timestamp > self.end {
                    self.timestamp -= span;
                } else {
                    self.timestamp += span;
                }
                if self.repetitions > 0 {
                    self.repetitions -= 1;
                    if self.repetitions == 0 {
                        self.timestamp = self.start;
                        break;
                    }
                }
            }
        }

        self.timestamp = self.timestamp.clamp(self.start, self.end);
        Some(self.timestamp + self.offset)
    }

    pub fn timestamp(&self) -> f32 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{Accessor, Buffer, BufferView};
    use serde_json::json;

    fn float_fixture(keys: &[f32], values: &[f32]) -> (Vec<Accessor>, Vec<BufferView>, Vec<Buffer>) {
        let mut data = Vec::new();
        for v in keys.iter().chain(values.iter()) {
            data.extend_from_slice(&v.to_le_bytes());
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
                byte_length: keys.len() * 4,
                byte_stride: None,
            },
            BufferView {
                buffer: 0,
                byte_offset: keys.len() * 4,
                byte_length: values.len() * 4,
                byte_stride: None,
            },
        ];
        let per_key = values.len() / keys.len();
        let (shape, count) = match per_key {
            1 => ("SCALAR", values.len()),
            3 => ("VEC3", keys.len()),
            4 => ("VEC4", keys.len()),
            _ => ("SCALAR", values.len()),
        };
        let accessors = vec![
            Accessor::from_json(&json!({
                "bufferView": 0, "componentType": 5126,
                "count": keys.len(), "type": "SCALAR",
            }))
            .unwrap(),
            Accessor::from_json(&json!({
                "bufferView": 1, "componentType": 5126,
                "count": count, "type": shape,
            }))
            .unwrap(),
        ];
        (accessors, views, buffers)
    }

    fn sampler(interpolation: Interpolation) -> AnimationSampler {
        AnimationSampler {
            input: 0,
            output: 1,
            interpolation,
            cursor_key: 0,
            cursor_t: f32::NEG_INFINITY,
            cache: None,
        }
    }

    #[test]
    fn linear_interpolates_between_keys() {
        let (accessors, views, buffers) = float_fixture(&[0.0, 1.0], &[0.0, 10.0]);
        let mut s = sampler(Interpolation::Linear);
        let v = s.sample(0.5, false, &accessors, &views, &buffers).unwrap();
        assert!((v[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn step_holds_previous_key() {
        let (accessors, views, buffers) = float_fixture(&[0.0, 1.0], &[0.0, 10.0]);
        let mut s = sampler(Interpolation::Step);
        let v = s.sample(0.99, false, &accessors, &views, &buffers).unwrap();
        assert_eq!(v[0], 0.0);
    }

    #[test]
    fn single_key_returns_that_value_anywhere() {
        let (accessors, views, buffers) = float_fixture(&[0.5], &[42.0]);
        let mut s = sampler(Interpolation::Linear);
        for t in [-10.0, 0.0, 0.5, 100.0] {
            let v = s.sample(t, false, &accessors, &views, &buffers).unwrap();
            assert_eq!(v[0], 42.0);
        }
    }

    #[test]
    fn cursor_resets_on_backward_time() {
        let (accessors, views, buffers) =
            float_fixture(&[0.0, 1.0, 2.0, 3.0], &[0.0, 1.0, 2.0, 3.0]);
        let mut s = sampler(Interpolation::Linear);
        let v = s.sample(2.5, false, &accessors, &views, &buffers).unwrap();
        assert!((v[0] - 2.5).abs() < 1e-6);
        // Scrub backward: the cursor must rewind, not stick at key 2.
        let v = s.sample(0.5, false, &accessors, &views, &buffers).unwrap();
        assert!((v[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rotation_slerp_normalizes() {
        let q0 = Quat::IDENTITY;
        let q1 = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let values = [
            q0.x, q0.y, q0.z, q0.w, //
            q1.x, q1.y, q1.z, q1.w,
        ];
        let (accessors, views, buffers) = float_fixture(&[0.0, 1.0], &values);
        let mut s = sampler(Interpolation::Linear);
        let v = s.sample(0.5, true, &accessors, &views, &buffers).unwrap();
        let q = Quat::from_xyzw(v[0], v[1], v[2], v[3]);
        assert!((q.length() - 1.0).abs() < 1e-5);
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(q.angle_between(expected) < 1e-4);
    }

    #[test]
    fn cubic_spline_hits_keyframe_values() {
        // Two keys, each (in-tangent, value, out-tangent), zero tangents.
        let values = [0.0, 1.0, 0.0, 0.0, 5.0, 0.0];
        let (accessors, views, buffers) = float_fixture(&[0.0, 2.0], &values);
        // per_key = 3 -> shaped as VEC3 rows by the fixture, which matches
        // a scalar cubic-spline layout.
        let mut s = sampler(Interpolation::CubicSpline);
        let at0 = s.sample(0.0, false, &accessors, &views, &buffers).unwrap();
        assert!((at0[0] - 1.0).abs() < 1e-6);
        let at2 = s.sample(2.0, false, &accessors, &views, &buffers).unwrap();
        assert!((at2[0] - 5.0).abs() < 1e-6);
        // Zero tangents make the midpoint the smoothstep blend.
        let mid = s.sample(1.0, false, &accessors, &views, &buffers).unwrap();
        assert!((mid[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_table_is_symmetric_and_exclusive() {
        let channel = |node: usize, path: TargetPath| Channel {
            sampler: 0,
            node: Some(node),
            path,
        };
        let anim = |channels: Vec<Channel>| Animation {
            name: String::new(),
            channels,
            samplers: Vec::new(),
            max_time: None,
        };

        let a = anim(vec![channel(0, TargetPath::Translation)]);
        let b = anim(vec![channel(1, TargetPath::Translation)]);
        let c = anim(vec![
            channel(0, TargetPath::Translation),
            channel(2, TargetPath::Scale),
        ]);

        let table = compute_disjoint_table(&[a, b, c]);
        assert!(table[0].contains(&1) && table[1].contains(&0));
        assert!(!table[0].contains(&2) && !table[2].contains(&0));
        assert!(table[1].contains(&2) && table[2].contains(&1));
    }

    #[test]
    fn advance_applies_and_resets_node_overrides() {
        use crate::document::Document;
        use crate::node::Node;

        let (accessors, views, buffers) =
            float_fixture(&[0.0, 1.0], &[0.0, 0.0, 0.0, 10.0, 0.0, 0.0]);
        let mut doc = Document {
            accessors,
            buffer_views: views,
            buffers,
            nodes: vec![Node::default()],
            animations: vec![Animation {
                name: "slide".into(),
                channels: vec![Channel {
                    sampler: 0,
                    node: Some(0),
                    path: TargetPath::Translation,
                }],
                samplers: vec![sampler(Interpolation::Linear)],
                max_time: None,
            }],
            ..Document::default()
        };

        advance(&mut doc, 0, Some(0.5));
        assert!(doc.nodes[0].translation.is_overridden());
        assert!((doc.nodes[0].translation.value().x - 5.0).abs() < 1e-6);

        // Time wraps modulo the animation's max time.
        advance(&mut doc, 0, Some(2.25));
        assert!((doc.nodes[0].translation.value().x - 2.5).abs() < 1e-6);

        // Pause-and-reset restores the rest pose.
        advance(&mut doc, 0, None);
        assert!(!doc.nodes[0].translation.is_overridden());
        assert_eq!(doc.nodes[0].translation.value(), glam::Vec3::ZERO);
    }

    #[test]
    fn reverse_clip_reflects_then_exhausts() {
        let mut clip = Clip::new(vec![0], 0.0, 1.0);
        clip.repetitions = 1;
        clip.reverse = true;

        // Cross `end`: reflect and flip speed to -1.
        let t = clip.advance(1.5).expect("still active");
        assert!((t - 0.5).abs() < 1e-6);
        assert_eq!(clip.speed, -1.0);

        // Cross `start`: repetition budget reaches zero.
        let t = clip.advance(0.7).expect("final step");
        assert_eq!(t, 0.0);
        assert_eq!(clip.repetitions, 0);
        assert!(clip.advance(0.1).is_none());
        assert!(clip.advance(10.0).is_none());
    }

    #[test]
    fn loop_clip_wraps_to_opposite_bound() {
        let mut clip = Clip::new(vec![0], 0.0, 2.0);
        let t = clip.advance(2.5).expect("active");
        assert!((t - 0.5).abs() < 1e-6);
        assert_eq!(clip.speed, 1.0);
    }

    #[test]
    fn zero_repetitions_is_disabled() {
        let mut clip = Clip::new(vec![0], 0.0, 1.0);
        clip.repetitions = 0;
        assert!(clip.advance(0.5).is_none());
    }
}
