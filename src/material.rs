use glam::{Mat3, Vec2, Vec3, Vec4};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One overridable value: an authored rest value plus an optional animation
/// override that wins while present. Node transforms, material factors and
/// mesh weights all go through this container.
#[derive(Debug, Clone, Default)]
pub struct Animatable<T: Clone> {
    rest: T,
    over: Option<T>,
}

impl<T: Clone> Animatable<T> {
    pub fn new(rest: T) -> Self {
        Self { rest, over: None }
    }

    pub fn value(&self) -> T {
        self.over.clone().unwrap_or_else(|| self.rest.clone())
    }

    pub fn rest(&self) -> T {
        self.rest.clone()
    }

    pub fn set_override(&mut self, value: T) {
        self.over = Some(value);
    }

    pub fn clear_override(&mut self) {
        self.over = None;
    }

    pub fn is_overridden(&self) -> bool {
        self.over.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlphaMode {
    Opaque,
    Mask,
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pipeline {
    MetallicRoughness,
    SpecularGlossiness,
    Unlit,
}

/// Offset/rotation/scale transform on one texture coordinate slot
/// (KHR_texture_transform).
#[derive(Debug, Clone, Copy)]
pub struct UvTransform {
    pub offset: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}

impl UvTransform {
    pub fn matrix(&self) -> Mat3 {
        let translation = Mat3::from_translation(self.offset);
        let rotation = Mat3::from_angle(-self.rotation);
        let scale = Mat3::from_scale(self.scale);
        translation * rotation * scale
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextureSlot {
    pub index: Option<usize>,
    pub tex_coord: usize,
    /// Normal-map scale or occlusion strength, 1.0 elsewhere.
    pub factor: f32,
    pub transform: Option<UvTransform>,
}

impl TextureSlot {
    pub fn from_json(v: &Value) -> Option<Self> {
        let v = v.as_object()?;
        let transform = v
            .get("extensions")
            .and_then(|e| e.get("KHR_texture_transform"))
            .map(|t| UvTransform {
                offset: vec2_or(t.get("offset"), Vec2::ZERO),
                rotation: f32_or(t.get("rotation"), 0.0),
                scale: vec2_or(t.get("scale"), Vec2::ONE),
            });
        Some(Self {
            index: v.get("index").and_then(|x| x.as_u64()).map(|x| x as usize),
            tex_coord: v
                .get("texCoord")
                .and_then(|x| x.as_u64())
                .unwrap_or(0) as usize,
            factor: f32_or(v.get("scale").or(v.get("strength")), 1.0),
            transform,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SpecGloss {
    pub diffuse_factor: Animatable<Vec4>,
    pub specular_factor: Animatable<Vec3>,
    pub glossiness_factor: Animatable<f32>,
    pub diffuse_texture: Option<TextureSlot>,
    pub specular_glossiness_texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Clearcoat {
    pub factor: Animatable<f32>,
    pub roughness_factor: Animatable<f32>,
    pub texture: Option<TextureSlot>,
    pub roughness_texture: Option<TextureSlot>,
    pub normal_texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Sheen {
    pub color_factor: Animatable<Vec3>,
    pub roughness_factor: Animatable<f32>,
    pub color_texture: Option<TextureSlot>,
    pub roughness_texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Transmission {
    pub factor: Animatable<f32>,
    pub texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Volume {
    pub thickness_factor: Animatable<f32>,
    pub attenuation_distance: Animatable<f32>,
    pub attenuation_color: Animatable<Vec3>,
    pub thickness_texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Specular {
    pub factor: Animatable<f32>,
    pub color_factor: Animatable<Vec3>,
    pub texture: Option<TextureSlot>,
    pub color_texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Iridescence {
    pub factor: Animatable<f32>,
    pub ior: Animatable<f32>,
    pub thickness_min: Animatable<f32>,
    pub thickness_max: Animatable<f32>,
    pub texture: Option<TextureSlot>,
    pub thickness_texture: Option<TextureSlot>,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub pipeline: Pipeline,
    pub base_color_factor: Animatable<Vec4>,
    pub metallic_factor: Animatable<f32>,
    pub roughness_factor: Animatable<f32>,
    pub emissive_factor: Animatable<Vec3>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: Animatable<f32>,
    pub double_sided: bool,
    pub base_color_texture: Option<TextureSlot>,
    pub metallic_roughness_texture: Option<TextureSlot>,
    pub normal_texture: Option<TextureSlot>,
    pub occlusion_texture: Option<TextureSlot>,
    pub emissive_texture: Option<TextureSlot>,
    pub spec_gloss: Option<SpecGloss>,
    pub clearcoat: Option<Clearcoat>,
    pub sheen: Option<Sheen>,
    pub transmission: Option<Transmission>,
    pub volume: Option<Volume>,
    pub specular: Option<Specular>,
    pub iridescence: Option<Iridescence>,
    pub emissive_strength: Option<Animatable<f32>>,
    pub ior: Option<Animatable<f32>>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            pipeline: Pipeline::MetallicRoughness,
            base_color_factor: Animatable::new(Vec4::ONE),
            metallic_factor: Animatable::new(1.0),
            roughness_factor: Animatable::new(1.0),
            emissive_factor: Animatable::new(Vec3::ZERO),
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: Animatable::new(0.5),
            double_sided: false,
            base_color_texture: None,
            metallic_roughness_texture: None,
            normal_texture: None,
            occlusion_texture: None,
            emissive_texture: None,
            spec_gloss: None,
            clearcoat: None,
            sheen: None,
            transmission: None,
            volume: None,
            specular: None,
            iridescence: None,
            emissive_strength: None,
            ior: None,
        }
    }
}

fn f32_or(v: Option<&Value>, default: f32) -> f32 {
    v.and_then(|x| x.as_f64()).map(|x| x as f32).unwrap_or(default)
}

fn floats(v: Option<&Value>) -> Option<Vec<f32>> {
    v?.as_array()
        .map(|arr| arr.iter().filter_map(|n| n.as_f64()).map(|n| n as f32).collect())
}

fn vec2_or(v: Option<&Value>, default: Vec2) -> Vec2 {
    floats(v)
        .filter(|f| f.len() >= 2)
        .map(|f| Vec2::new(f[0], f[1]))
        .unwrap_or(default)
}

fn vec3_or(v: Option<&Value>, default: Vec3) -> Vec3 {
    floats(v)
        .filter(|f| f.len() >= 3)
        .map(|f| Vec3::new(f[0], f[1], f[2]))
        .unwrap_or(default)
}

fn vec4_or(v: Option<&Value>, default: Vec4) -> Vec4 {
    floats(v)
        .filter(|f| f.len() >= 4)
        .map(|f| Vec4::new(f[0], f[1], f[2], f[3]))
        .unwrap_or(default)
}

fn slot(v: Option<&Value>) -> Option<TextureSlot> {
    v.and_then(TextureSlot::from_json)
}

impl Material {
    pub fn from_json(v: &Value) -> Self {
        let mut material = Self {
            name: v
                .get("name")
                .and_then(|x| x.as_str())
                .unwrap_or_default()
                .to_string(),
            ..Self::default()
        };

        if let Some(pbr) = v.get("pbrMetallicRoughness") {
            material.base_color_factor =
                Animatable::new(vec4_or(pbr.get("baseColorFactor"), Vec4::ONE));
            material.metallic_factor = Animatable::new(f32_or(pbr.get("metallicFactor"), 1.0));
            material.roughness_factor = Animatable::new(f32_or(pbr.get("roughnessFactor"), 1.0));
            material.base_color_texture = slot(pbr.get("baseColorTexture"));
            material.metallic_roughness_texture = slot(pbr.get("metallicRoughnessTexture"));
        }

        material.emissive_factor = Animatable::new(vec3_or(v.get("emissiveFactor"), Vec3::ZERO));
        material.normal_texture = slot(v.get("normalTexture"));
        material.occlusion_texture = slot(v.get("occlusionTexture"));
        material.emissive_texture = slot(v.get("emissiveTexture"));
        material.alpha_mode = match v.get("alphaMode").and_then(|x| x.as_str()) {
            Some("MASK") => AlphaMode::Mask,
            Some("BLEND") => AlphaMode::Blend,
            _ => AlphaMode::Opaque,
        };
        material.alpha_cutoff = Animatable::new(f32_or(v.get("alphaCutoff"), 0.5));
        material.double_sided = v
            .get("doubleSided")
            .and_then(|x| x.as_bool())
            .unwrap_or(false);

        let Some(ext) = v.get("extensions") else {
            return material;
        };

        if ext.get("KHR_materials_unlit").is_some() {
            material.pipeline = Pipeline::Unlit;
        }
        if let Some(sg) = ext.get("KHR_materials_pbrSpecularGlossiness") {
            material.pipeline = Pipeline::SpecularGlossiness;
            material.spec_gloss = Some(SpecGloss {
                diffuse_factor: Animatable::new(vec4_or(sg.get("diffuseFactor"), Vec4::ONE)),
                specular_factor: Animatable::new(vec3_or(sg.get("specularFactor"), Vec3::ONE)),
                glossiness_factor: Animatable::new(f32_or(sg.get("glossinessFactor"), 1.0)),
                diffuse_texture: slot(sg.get("diffuseTexture")),
                specular_glossiness_texture: slot(sg.get("specularGlossinessTexture")),
            });
        }
        if let Some(cc) = ext.get("KHR_materials_clearcoat") {
            material.clearcoat = Some(Clearcoat {
                factor: Animatable::new(f32_or(cc.get("clearcoatFactor"), 0.0)),
                roughness_factor: Animatable::new(f32_or(cc.get("clearcoatRoughnessFactor"), 0.0)),
                texture: slot(cc.get("clearcoatTexture")),
                roughness_texture: slot(cc.get("clearcoatRoughnessTexture")),
                normal_texture: slot(cc.get("clearcoatNormalTexture")),
            });
        }
        if let Some(sh) = ext.get("KHR_materials_sheen") {
            material.sheen = Some(Sheen {
                color_factor: Animatable::new(vec3_or(sh.get("sheenColorFactor"), Vec3::ZERO)),
                roughness_factor: Animatable::new(f32_or(sh.get("sheenRoughnessFactor"), 0.0)),
                color_texture: slot(sh.get("sheenColorTexture")),
                roughness_texture: slot(sh.get("sheenRoughnessTexture")),
            });
        }
        if let Some(tr) = ext.get("KHR_materials_transmission") {
            material.transmission = Some(Transmission {
                factor: Animatable::new(f32_or(tr.get("transmissionFactor"), 0.0)),
                texture: slot(tr.get("transmissionTexture")),
            });
        }
        if let Some(vol) = ext.get("KHR_materials_volume") {
            material.volume = Some(Volume {
                thickness_factor: Animatable::new(f32_or(vol.get("thicknessFactor"), 0.0)),
                attenuation_distance: Animatable::new(f32_or(
                    vol.get("attenuationDistance"),
                    f32::INFINITY,
                )),
                attenuation_color: Animatable::new(vec3_or(vol.get("attenuationColor"), Vec3::ONE)),
                thickness_texture: slot(vol.get("thicknessTexture")),
            });
        }
        if let Some(sp) = ext.get("KHR_materials_specular") {
            material.specular = Some(Specular {
                factor: Animatable::new(f32_or(sp.get("specularFactor"), 1.0)),
                color_factor: Animatable::new(vec3_or(sp.get("specularColorFactor"), Vec3::ONE)),
                texture: slot(sp.get("specularTexture")),
                color_texture: slot(sp.get("specularColorTexture")),
            });
        }
        if let Some(ir) = ext.get("KHR_materials_iridescence") {
            material.iridescence = Some(Iridescence {
                factor: Animatable::new(f32_or(ir.get("iridescenceFactor"), 0.0)),
                ior: Animatable::new(f32_or(ir.get("iridescenceIor"), 1.3)),
                thickness_min: Animatable::new(f32_or(ir.get("iridescenceThicknessMinimum"), 100.0)),
                thickness_max: Animatable::new(f32_or(ir.get("iridescenceThicknessMaximum"), 400.0)),
                texture: slot(ir.get("iridescenceTexture")),
                thickness_texture: slot(ir.get("iridescenceThicknessTexture")),
            });
        }
        if let Some(es) = ext.get("KHR_materials_emissive_strength") {
            material.emissive_strength =
                Some(Animatable::new(f32_or(es.get("emissiveStrength"), 1.0)));
        }
        if let Some(io) = ext.get("KHR_materials_ior") {
            material.ior = Some(Animatable::new(f32_or(io.get("ior"), 1.5)));
        }

        material
    }

    pub fn has_transmission(&self) -> bool {
        self.transmission.is_some()
    }

    /// Restores every animatable factor to its rest value.
    pub fn clear_overrides(&mut self) {
        self.base_color_factor.clear_override();
        self.metallic_factor.clear_override();
        self.roughness_factor.clear_override();
        self.emissive_factor.clear_override();
        self.alpha_cutoff.clear_override();
    }
}

/// Which optional material features the viewer has globally enabled. A
/// material extension only reaches the shader when the material carries the
/// data AND the matching switch here is on.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureToggles {
    pub clearcoat: bool,
    pub sheen: bool,
    pub transmission: bool,
    pub volume: bool,
    pub specular: bool,
    pub iridescence: bool,
    pub emissive_strength: bool,
    pub ior: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            clearcoat: true,
            sheen: true,
            transmission: true,
            volume: true,
            specular: true,
            iridescence: true,
            emissive_strength: true,
            ior: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat3([[f32; 3]; 3]),
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v.to_array())
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v.to_array())
    }
}

impl From<Mat3> for UniformValue {
    fn from(m: Mat3) -> Self {
        Self::Mat3(m.to_cols_array_2d())
    }
}

/// Defines plus named properties selecting and feeding one shader
/// permutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShaderInputs {
    pub defines: Vec<String>,
    pub properties: BTreeMap<String, UniformValue>,
}

impl ShaderInputs {
    fn define(&mut self, name: &str) {
        self.defines.push(name.to_string());
    }

    fn property(&mut self, name: &str, value: impl Into<UniformValue>) {
        self.properties.insert(name.to_string(), value.into());
    }

    fn texture_slot(
        &mut self,
        slot: &Option<TextureSlot>,
        map_define: &str,
        transform_define: &str,
        transform_property: &str,
    ) {
        let Some(slot) = slot else { return };
        if slot.index.is_none() {
            return;
        }
        self.define(map_define);
        if let Some(transform) = &slot.transform {
            self.define(transform_define);
            self.property(transform_property, transform.matrix());
        }
    }
}

/// Deterministic defines + properties for one (material, toggles) pair.
/// Exactly one base pipeline define is emitted; each optional extension is
/// double-gated on material data and the caller's toggles.
pub fn shader_inputs(material: &Material, toggles: &FeatureToggles) -> ShaderInputs {
    let mut out = ShaderInputs::default();

    match material.pipeline {
        Pipeline::MetallicRoughness => out.define("MATERIAL_METALLICROUGHNESS 1"),
        Pipeline::SpecularGlossiness => out.define("MATERIAL_SPECULARGLOSSINESS 1"),
        Pipeline::Unlit => out.define("MATERIAL_UNLIT 1"),
    }

    out.property("u_BaseColorFactor", material.base_color_factor.value());
    out.property(
        "u_MetallicFactor",
        UniformValue::Float(material.metallic_factor.value()),
    );
    out.property(
        "u_RoughnessFactor",
        UniformValue::Float(material.roughness_factor.value()),
    );
    out.property("u_EmissiveFactor", material.emissive_factor.value());

    out.texture_slot(
        &material.base_color_texture,
        "HAS_BASE_COLOR_MAP 1",
        "HAS_BASECOLOR_UV_TRANSFORM 1",
        "u_BaseColorUVTransform",
    );
    out.texture_slot(
        &material.metallic_roughness_texture,
        "HAS_METALLIC_ROUGHNESS_MAP 1",
        "HAS_METALLICROUGHNESS_UV_TRANSFORM 1",
        "u_MetallicRoughnessUVTransform",
    );
    out.texture_slot(
        &material.normal_texture,
        "HAS_NORMAL_MAP 1",
        "HAS_NORMAL_UV_TRANSFORM 1",
        "u_NormalUVTransform",
    );
    out.texture_slot(
        &material.occlusion_texture,
        "HAS_OCCLUSION_MAP 1",
        "HAS_OCCLUSION_UV_TRANSFORM 1",
        "u_OcclusionUVTransform",
    );
    out.texture_slot(
        &material.emissive_texture,
        "HAS_EMISSIVE_MAP 1",
        "HAS_EMISSIVE_UV_TRANSFORM 1",
        "u_EmissiveUVTransform",
    );
    if let Some(slot) = &material.normal_texture {
        out.property("u_NormalScale", UniformValue::Float(slot.factor));
    }
    if let Some(slot) = &material.occlusion_texture {
        out.property("u_OcclusionStrength", UniformValue::Float(slot.factor));
    }

    if let Some(sg) = &material.spec_gloss {
        out.property("u_DiffuseFactor", sg.diffuse_factor.value());
        out.property("u_SpecularFactor", sg.specular_factor.value());
        out.property(
            "u_GlossinessFactor",
            UniformValue::Float(sg.glossiness_factor.value()),
        );
        out.texture_slot(
            &sg.diffuse_texture,
            "HAS_DIFFUSE_MAP 1",
            "HAS_DIFFUSE_UV_TRANSFORM 1",
            "u_DiffuseUVTransform",
        );
        out.texture_slot(
            &sg.specular_glossiness_texture,
            "HAS_SPECULAR_GLOSSINESS_MAP 1",
            "HAS_SPECULARGLOSSINESS_UV_TRANSFORM 1",
            "u_SpecularGlossinessUVTransform",
        );
    }

    if let (Some(cc), true) = (&material.clearcoat, toggles.clearcoat) {
        out.define("MATERIAL_CLEARCOAT 1");
        out.property("u_ClearcoatFactor", UniformValue::Float(cc.factor.value()));
        out.property(
            "u_ClearcoatRoughnessFactor",
            UniformValue::Float(cc.roughness_factor.value()),
        );
        out.texture_slot(
            &cc.texture,
            "HAS_CLEARCOAT_MAP 1",
            "HAS_CLEARCOAT_UV_TRANSFORM 1",
            "u_ClearcoatUVTransform",
        );
        out.texture_slot(
            &cc.roughness_texture,
            "HAS_CLEARCOAT_ROUGHNESS_MAP 1",
            "HAS_CLEARCOATROUGHNESS_UV_TRANSFORM 1",
            "u_ClearcoatRoughnessUVTransform",
        );
        out.texture_slot(
            &cc.normal_texture,
            "HAS_CLEARCOAT_NORMAL_MAP 1",
            "HAS_CLEARCOATNORMAL_UV_TRANSFORM 1",
            "u_ClearcoatNormalUVTransform",
        );
    }

    if let (Some(sh), true) = (&material.sheen, toggles.sheen) {
        out.define("MATERIAL_SHEEN 1");
        out.property("u_SheenColorFactor", sh.color_factor.value());
        out.property(
            "u_SheenRoughnessFactor",
            UniformValue::Float(sh.roughness_factor.value()),
        );
        out.texture_slot(
            &sh.color_texture,
            "HAS_SHEEN_COLOR_MAP 1",
            "HAS_SHEENCOLOR_UV_TRANSFORM 1",
            "u_SheenColorUVTransform",
        );
        out.texture_slot(
            &sh.roughness_texture,
            "HAS_SHEEN_ROUGHNESS_MAP 1",
            "HAS_SHEENROUGHNESS_UV_TRANSFORM 1",
            "u_SheenRoughnessUVTransform",
        );
    }

    if let (Some(tr), true) = (&material.transmission, toggles.transmission) {
        out.define("MATERIAL_TRANSMISSION 1");
        out.property(
            "u_TransmissionFactor",
            UniformValue::Float(tr.factor.value()),
        );
        out.texture_slot(
            &tr.texture,
            "HAS_TRANSMISSION_MAP 1",
            "HAS_TRANSMISSION_UV_TRANSFORM 1",
            "u_TransmissionUVTransform",
        );
    }

    if let (Some(vol), true) = (&material.volume, toggles.volume) {
        out.define("MATERIAL_VOLUME 1");
        out.property(
            "u_ThicknessFactor",
            UniformValue::Float(vol.thickness_factor.value()),
        );
        out.property(
            "u_AttenuationDistance",
            UniformValue::Float(vol.attenuation_distance.value()),
        );
        out.property("u_AttenuationColor", vol.attenuation_color.value());
        out.texture_slot(
            &vol.thickness_texture,
            "HAS_THICKNESS_MAP 1",
            "HAS_THICKNESS_UV_TRANSFORM 1",
            "u_ThicknessUVTransform",
        );
    }

    if let (Some(sp), true) = (&material.specular, toggles.specular) {
        out.define("MATERIAL_SPECULAR 1");
        out.property("u_KHR_materials_specular_specularFactor", UniformValue::Float(sp.factor.value()));
        out.property(
            "u_KHR_materials_specular_specularColorFactor",
            sp.color_factor.value(),
        );
        out.texture_slot(
            &sp.texture,
            "HAS_SPECULAR_MAP 1",
            "HAS_SPECULAR_UV_TRANSFORM 1",
            "u_SpecularUVTransform",
        );
        out.texture_slot(
            &sp.color_texture,
            "HAS_SPECULAR_COLOR_MAP 1",
            "HAS_SPECULARCOLOR_UV_TRANSFORM 1",
            "u_SpecularColorUVTransform",
        );
    }

    if let (Some(ir), true) = (&material.iridescence, toggles.iridescence) {
        out.define("MATERIAL_IRIDESCENCE 1");
        out.property("u_IridescenceFactor", UniformValue::Float(ir.factor.value()));
        out.property("u_IridescenceIor", UniformValue::Float(ir.ior.value()));
        out.property(
            "u_IridescenceThicknessMinimum",
            UniformValue::Float(ir.thickness_min.value()),
        );
        out.property(
            "u_IridescenceThicknessMaximum",
            UniformValue::Float(ir.thickness_max.value()),
        );
        out.texture_slot(
            &ir.texture,
            "HAS_IRIDESCENCE_MAP 1",
            "HAS_IRIDESCENCE_UV_TRANSFORM 1",
            "u_IridescenceUVTransform",
        );
        out.texture_slot(
            &ir.thickness_texture,
            "HAS_IRIDESCENCE_THICKNESS_MAP 1",
            "HAS_IRIDESCENCETHICKNESS_UV_TRANSFORM 1",
            "u_IridescenceThicknessUVTransform",
        );
    }

    if let (Some(es), true) = (&material.emissive_strength, toggles.emissive_strength) {
        out.define("MATERIAL_EMISSIVE_STRENGTH 1");
        out.property("u_EmissiveStrength", UniformValue::Float(es.value()));
    }

    if let (Some(io), true) = (&material.ior, toggles.ior) {
        out.define("MATERIAL_IOR 1");
        out.property("u_Ior", UniformValue::Float(io.value()));
    }

    match material.alpha_mode {
        AlphaMode::Opaque => {
            out.define("ALPHAMODE_OPAQUE 1");
        }
        AlphaMode::Mask => {
            out.define("ALPHAMODE_MASK 1");
            out.property(
                "u_AlphaCutoff",
                UniformValue::Float(material.alpha_cutoff.value()),
            );
        }
        // BLEND: no cutoff behavior and no depth write; the draw-list
        // builder routes these into the transparent bucket.
        AlphaMode::Blend => {
            out.define("ALPHAMODE_BLEND 1");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn override_wins_then_clears() {
        let mut v = Animatable::new(2.0f32);
        assert_eq!(v.value(), 2.0);
        v.set_override(7.0);
        assert_eq!(v.value(), 7.0);
        assert_eq!(v.rest(), 2.0);
        v.clear_override();
        assert_eq!(v.value(), 2.0);
    }

    #[test]
    fn exactly_one_pipeline_define() {
        let unlit = Material::from_json(&json!({
            "extensions": {"KHR_materials_unlit": {}}
        }));
        let inputs = shader_inputs(&unlit, &FeatureToggles::default());
        let pipelines: Vec<_> = inputs
            .defines
            .iter()
            .filter(|d| {
                d.starts_with("MATERIAL_METALLICROUGHNESS")
                    || d.starts_with("MATERIAL_SPECULARGLOSSINESS")
                    || d.starts_with("MATERIAL_UNLIT")
            })
            .collect();
        assert_eq!(pipelines, vec!["MATERIAL_UNLIT 1"]);
    }

    #[test]
    fn extension_is_double_gated() {
        let material = Material::from_json(&json!({
            "extensions": {"KHR_materials_clearcoat": {"clearcoatFactor": 0.8}}
        }));

        let on = shader_inputs(&material, &FeatureToggles::default());
        assert!(on.defines.iter().any(|d| d == "MATERIAL_CLEARCOAT 1"));

        let toggles = FeatureToggles {
            clearcoat: false,
            ..FeatureToggles::default()
        };
        let off = shader_inputs(&material, &toggles);
        assert!(!off.defines.iter().any(|d| d == "MATERIAL_CLEARCOAT 1"));
        assert!(!off.properties.contains_key("u_ClearcoatFactor"));
    }

    #[test]
    fn mask_mode_emits_cutoff() {
        let material = Material::from_json(&json!({
            "alphaMode": "MASK",
            "alphaCutoff": 0.25,
        }));
        let inputs = shader_inputs(&material, &FeatureToggles::default());
        assert!(inputs.defines.iter().any(|d| d == "ALPHAMODE_MASK 1"));
        assert!(matches!(
            inputs.properties.get("u_AlphaCutoff"),
            Some(UniformValue::Float(c)) if (*c - 0.25).abs() < 1e-6
        ));
    }

    #[test]
    fn uv_transform_adds_define_and_matrix() {
        let material = Material::from_json(&json!({
            "pbrMetallicRoughness": {
                "baseColorTexture": {
                    "index": 0,
                    "extensions": {
                        "KHR_texture_transform": {"offset": [0.5, 0.5], "scale": [2.0, 2.0]}
                    }
                }
            }
        }));
        let inputs = shader_inputs(&material, &FeatureToggles::default());
        assert!(
            inputs
                .defines
                .iter()
                .any(|d| d == "HAS_BASECOLOR_UV_TRANSFORM 1")
        );
        assert!(inputs.properties.contains_key("u_BaseColorUVTransform"));
    }
}
