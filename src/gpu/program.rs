//! Shader programs and their named uniforms.

use std::collections::BTreeMap;
use std::mem;

use cgmath::{Matrix4, Vector3};

use crate::gpu::{Gpu, ProgramId, ShaderId, ShaderStage};

/// The value of one uniform. There are exactly three kinds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum UniformValue {
    Mat4(Matrix4<f32>),
    Vec3(Vector3<f32>),
    Int(i32),
}

impl UniformValue {
    /// Raw bytes as a shader reads them: column-major floats or a single `i32`.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Mat4(m) => {
                let columns: [[f32; 4]; 4] = (*m).into();
                bytemuck::cast_slice(&columns).to_vec()
            }
            UniformValue::Vec3(v) => {
                let v: [f32; 3] = (*v).into();
                bytemuck::cast_slice(&v).to_vec()
            }
            UniformValue::Int(i) => i.to_ne_bytes().to_vec(),
        }
    }

    fn same_kind(&self, other: &UniformValue) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl From<Matrix4<f32>> for UniformValue {
    fn from(m: Matrix4<f32>) -> Self {
        UniformValue::Mat4(m)
    }
}

impl From<Vector3<f32>> for UniformValue {
    fn from(v: Vector3<f32>) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<i32> for UniformValue {
    fn from(i: i32) -> Self {
        UniformValue::Int(i)
    }
}

/// A uniform's current value and where it lives in its program.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Uniform {
    value: UniformValue,
    location: i32,
}

impl Uniform {
    pub fn value(&self) -> UniformValue {
        self.value
    }

    pub fn location(&self) -> i32 {
        self.location
    }

    /// Replace the value. The kind of a uniform never changes.
    ///
    /// # Panics
    /// When `value` is a different kind than the registered one.
    pub fn set(&mut self, value: impl Into<UniformValue>) {
        let value = value.into();
        assert!(
            self.value.same_kind(&value),
            "uniform kind changed from {:?} to {:?}",
            self.value,
            value
        );
        self.value = value;
    }

    pub fn load<G: Gpu + ?Sized>(&self, gpu: &mut G, program: ProgramId) {
        if self.location < 0 {
            return;
        }
        gpu.set_uniform(program, self.location, &self.value);
    }
}

/// Named uniforms of one program, resolved when they are added.
#[derive(Clone, Debug)]
pub struct UniformBinder {
    program: ProgramId,
    uniforms: BTreeMap<String, Uniform>,
}

impl UniformBinder {
    pub fn new(program: ProgramId) -> Self {
        Self {
            program,
            uniforms: BTreeMap::new(),
        }
    }

    /// Register (or replace) a uniform and resolve its location right away.
    ///
    /// A name the linked program does not use resolves to -1; loading it is a no-op.
    pub fn add_uniform<G: Gpu + ?Sized>(&mut self, gpu: &mut G, name: &str, value: impl Into<UniformValue>) {
        let location = gpu.uniform_location(self.program, name);
        if location < 0 {
            log::warn!("uniform {name} is not active in program {:?}", self.program);
        }
        self.uniforms.insert(
            name.to_owned(),
            Uniform {
                value: value.into(),
                location,
            },
        );
    }

    pub fn try_get(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    /// # Panics
    /// When `name` was never registered. That is a bug in the caller, not bad data.
    pub fn get(&self, name: &str) -> &Uniform {
        match self.uniforms.get(name) {
            Some(uniform) => uniform,
            None => panic!("Uniform {name} does not exist."),
        }
    }

    /// # Panics
    /// When `name` was never registered.
    pub fn get_mut(&mut self, name: &str) -> &mut Uniform {
        match self.uniforms.get_mut(name) {
            Some(uniform) => uniform,
            None => panic!("Uniform {name} does not exist."),
        }
    }

    /// Shorthand for `get_mut(name).set(value)`.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) {
        self.get_mut(name).set(value);
    }

    /// Upload every registered uniform.
    pub fn load<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        for uniform in self.uniforms.values() {
            uniform.load(gpu, self.program);
        }
    }

    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.uniforms.keys().map(String::as_str)
    }
}

/// A compiled shader stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shader {
    id: ShaderId,
    stage: ShaderStage,
}

impl Shader {
    /// Compile `source`. The error is the compiler log.
    pub fn compile<G: Gpu + ?Sized>(
        gpu: &mut G,
        stage: ShaderStage,
        label: &str,
        source: &str,
    ) -> anyhow::Result<Self> {
        let id = gpu
            .create_shader(stage, label, source)
            .map_err(|log| anyhow::anyhow!("Unable to compile {label}: {log}"))?;
        Ok(Self { id, stage })
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

/// A shader program plus the uniforms registered against it.
///
/// Stages are attached first and the program is linked in a separate step. A
/// link failure is logged and remembered, not raised: the program simply
/// draws nothing useful.
#[derive(Debug)]
pub struct Program {
    id: ProgramId,
    label: String,
    shaders: Vec<ShaderId>,
    linked: bool,
    pub uniforms: UniformBinder,
}

impl Program {
    pub fn new<G: Gpu + ?Sized>(gpu: &mut G, label: &str) -> Self {
        let id = gpu.create_program(label);
        Self {
            id,
            label: label.to_owned(),
            shaders: Vec::new(),
            linked: false,
            uniforms: UniformBinder::new(id),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn attach<G: Gpu + ?Sized>(&mut self, gpu: &mut G, shader: &Shader) {
        gpu.attach_shader(self.id, shader.id);
        self.shaders.push(shader.id);
    }

    /// Link the attached stages. On failure the info log is logged and returned.
    pub fn link<G: Gpu + ?Sized>(&mut self, gpu: &mut G) -> Result<(), String> {
        match gpu.link_program(self.id) {
            Ok(()) => {
                self.linked = true;
                Ok(())
            }
            Err(info_log) => {
                self.linked = false;
                log::error!("Unable to link shader {}: {info_log}", self.label);
                Err(info_log)
            }
        }
    }

    pub fn add_uniform<G: Gpu + ?Sized>(&mut self, gpu: &mut G, name: &str, value: impl Into<UniformValue>) {
        self.uniforms.add_uniform(gpu, name, value);
    }

    /// Upload all uniforms. The program has to be current.
    pub fn load<G: Gpu + ?Sized>(&self, gpu: &mut G) {
        self.uniforms.load(gpu);
    }

    /// Release the program and the stages attached to it.
    pub fn delete<G: Gpu + ?Sized>(self, gpu: &mut G) {
        for shader in self.shaders {
            gpu.delete_shader(shader);
        }
        gpu.delete_program(self.id);
    }
}
