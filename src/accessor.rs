use serde::Serialize;
use serde_json::Value;

/// A raw byte buffer. `data` is empty until the loader resolves the source
/// (GLB chunk, data URI or external file); consumers treat an empty buffer
/// as an unresolved reference and skip dependent work.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub uri: Option<String>,
    pub byte_length: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BufferView {
    pub buffer: usize,
    pub byte_offset: usize,
    pub byte_length: usize,
    pub byte_stride: Option<usize>,
}

impl BufferView {
    pub fn from_json(v: &Value) -> Self {
        Self {
            buffer: get_usize(v, "buffer").unwrap_or(0),
            byte_offset: get_usize(v, "byteOffset").unwrap_or(0),
            byte_length: get_usize(v, "byteLength").unwrap_or(0),
            byte_stride: get_usize(v, "byteStride"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ComponentType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            5120 => Some(Self::I8),
            5121 => Some(Self::U8),
            5122 => Some(Self::I16),
            5123 => Some(Self::U16),
            5125 => Some(Self::U32),
            5126 => Some(Self::F32),
            _ => None,
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ElementShape {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl ElementShape {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCALAR" => Some(Self::Scalar),
            "VEC2" => Some(Self::Vec2),
            "VEC3" => Some(Self::Vec3),
            "VEC4" => Some(Self::Vec4),
            "MAT2" => Some(Self::Mat2),
            "MAT3" => Some(Self::Mat3),
            "MAT4" => Some(Self::Mat4),
            _ => None,
        }
    }

    pub fn components(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
            Self::Mat2 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SparseOverride {
    pub count: usize,
    pub indices_view: Option<usize>,
    pub indices_offset: usize,
    pub indices_component: ComponentType,
    pub values_view: Option<usize>,
    pub values_offset: usize,
}

/// Typed view over a byte range: how to read `count` elements of
/// `shape` × `component_type` out of a buffer view. Never mutates its
/// source buffer.
#[derive(Debug, Clone)]
pub struct Accessor {
    pub buffer_view: Option<usize>,
    pub byte_offset: usize,
    pub component_type: ComponentType,
    pub normalized: bool,
    pub count: usize,
    pub shape: ElementShape,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub sparse: Option<SparseOverride>,
}

/// Inert zero-count accessor; stands in for malformed entries so that
/// accessor indices stay aligned.
impl Default for Accessor {
    fn default() -> Self {
        Self {
            buffer_view: None,
            byte_offset: 0,
            component_type: ComponentType::F32,
            normalized: false,
            count: 0,
            shape: ElementShape::Scalar,
            min: Vec::new(),
            max: Vec::new(),
            sparse: None,
        }
    }
}

fn get_usize(v: &Value, key: &str) -> Option<usize> {
    v.get(key).and_then(|x| x.as_u64()).map(|x| x as usize)
}

impl Accessor {
    pub fn from_json(v: &Value) -> Option<Self> {
        let component_type =
            ComponentType::from_code(v.get("componentType").and_then(|x| x.as_u64())?)?;
        let shape = ElementShape::from_name(v.get("type").and_then(|x| x.as_str())?)?;
        let grab_bounds = |key: &str| {
            v.get(key)
                .and_then(|x| x.as_array())
                .map(|arr| arr.iter().filter_map(|n| n.as_f64()).collect::<Vec<_>>())
                .unwrap_or_default()
        };

        let sparse = v.get("sparse").and_then(|s| {
            let indices = s.get("indices")?;
            let values = s.get("values")?;
            Some(SparseOverride {
                count: get_usize(s, "count")?,
                indices_view: get_usize(indices, "bufferView"),
                indices_offset: get_usize(indices, "byteOffset").unwrap_or(0),
                indices_component: ComponentType::from_code(
                    indices.get("componentType").and_then(|x| x.as_u64())?,
                )?,
                values_view: get_usize(values, "bufferView"),
                values_offset: get_usize(values, "byteOffset").unwrap_or(0),
            })
        });

        Some(Self {
            buffer_view: get_usize(v, "bufferView"),
            byte_offset: get_usize(v, "byteOffset").unwrap_or(0),
            component_type,
            normalized: v
                .get("normalized")
                .and_then(|x| x.as_bool())
                .unwrap_or(false),
            count: get_usize(v, "count").unwrap_or(0),
            shape,
            min: grab_bounds("min"),
            max: grab_bounds("max"),
            sparse,
        })
    }

    fn element_stride(&self, view: &BufferView) -> usize {
        view.byte_stride
            .unwrap_or(self.shape.components() * self.component_type.byte_size())
    }

    /// Reads every element as f32 components, flattened to
    /// `count * shape.components()` values. Integer components are
    /// normalized to [0,1] / [-1,1] when the accessor says so. Returns
    /// `None` when the backing view is unresolved or the declared range
    /// runs past the buffer; the caller warns and skips.
    pub fn read_floats(&self, views: &[BufferView], buffers: &[Buffer]) -> Option<Vec<f32>> {
        let components = self.shape.components();
        let mut out = match self.buffer_view {
            Some(view_index) => {
                let view = views.get(view_index)?;
                let buffer = buffers.get(view.buffer)?;
                if buffer.data.is_empty() {
                    return None;
                }
                let stride = self.element_stride(view);
                let element_size = components * self.component_type.byte_size();
                let base = view.byte_offset + self.byte_offset;
                if self.count > 0 {
                    let last = base + (self.count - 1) * stride + element_size;
                    if last > view.byte_offset + view.byte_length || last > buffer.data.len() {
                        return None;
                    }
                }

                let mut out = Vec::with_capacity(self.count * components);
                for i in 0..self.count {
                    let at = base + i * stride;
                    for c in 0..components {
                        out.push(read_component(
                            &buffer.data,
                            at + c * self.component_type.byte_size(),
                            self.component_type,
                            self.normalized,
                        )?);
                    }
                }
                out
            }
            // A sparse accessor without a base view starts from zeros.
            None => vec![0.0; self.count * components],
        };

        if let Some(sparse) = &self.sparse {
            self.apply_sparse(sparse, views, buffers, &mut out);
        }
        Some(out)
    }

    fn apply_sparse(
        &self,
        sparse: &SparseOverride,
        views: &[BufferView],
        buffers: &[Buffer],
        out: &mut [f32],
    ) {
        let components = self.shape.components();
        let Some((indices_data, indices_base)) =
            sparse_slice(sparse.indices_view, sparse.indices_offset, views, buffers)
        else {
            return;
        };
        let Some((values_data, values_base)) =
            sparse_slice(sparse.values_view, sparse.values_offset, views, buffers)
        else {
            return;
        };

        for i in 0..sparse.count {
            let idx_at = indices_base + i * sparse.indices_component.byte_size();
            let Some(target) =
                read_component(indices_data, idx_at, sparse.indices_component, false)
            else {
                return;
            };
            let target = target as usize;
            if target >= self.count {
                eprintln!("[warn] sparse accessor index {target} out of range, skipped");
                continue;
            }
            for c in 0..components {
                let value_at = values_base
                    + (i * components + c) * self.component_type.byte_size();
                if let Some(v) =
                    read_component(values_data, value_at, self.component_type, self.normalized)
                {
                    out[target * components + c] = v;
                }
            }
        }
    }

    /// Elements grouped per shape, e.g. Vec3 positions as chunks of 3.
    pub fn read_elements(&self, views: &[BufferView], buffers: &[Buffer]) -> Option<Vec<Vec<f32>>> {
        let flat = self.read_floats(views, buffers)?;
        let components = self.shape.components();
        Some(flat.chunks(components).map(|c| c.to_vec()).collect())
    }

    /// Index-style read: every element as usize (SCALAR accessors only make
    /// sense here, but the conversion tolerates anything).
    pub fn read_indices(&self, views: &[BufferView], buffers: &[Buffer]) -> Option<Vec<usize>> {
        let flat = self.read_floats(views, buffers)?;
        Some(flat.into_iter().map(|f| f as usize).collect())
    }
}

fn sparse_slice<'a>(
    view_index: Option<usize>,
    extra_offset: usize,
    views: &[BufferView],
    buffers: &'a [Buffer],
) -> Option<(&'a [u8], usize)> {
    let view = views.get(view_index?)?;
    let buffer = buffers.get(view.buffer)?;
    if buffer.data.is_empty() {
        return None;
    }
    Some((&buffer.data, view.byte_offset + extra_offset))
}

fn read_component(
    data: &[u8],
    at: usize,
    component: ComponentType,
    normalized: bool,
) -> Option<f32> {
    let size = component.byte_size();
    if at + size > data.len() {
        return None;
    }
    let raw = &data[at..at + size];
    let value = match component {
        ComponentType::I8 => {
            let v = raw[0] as i8 as f32;
            if normalized { (v / 127.0).max(-1.0) } else { v }
        }
        ComponentType::U8 => {
            let v = raw[0] as f32;
            if normalized { v / 255.0 } else { v }
        }
        ComponentType::I16 => {
            let v = i16::from_le_bytes([raw[0], raw[1]]) as f32;
            if normalized { (v / 32767.0).max(-1.0) } else { v }
        }
        ComponentType::U16 => {
            let v = u16::from_le_bytes([raw[0], raw[1]]) as f32;
            if normalized { v / 65535.0 } else { v }
        }
        ComponentType::U32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32,
        ComponentType::F32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
    };
    Some(value)
}
