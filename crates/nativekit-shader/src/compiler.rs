//! GLSL to native shader compilation.

use naga::back::{glsl as glsl_out, spv};
use naga::front::glsl as glsl_in;
use naga::valid::{ModuleInfo, ValidationFlags, Validator};
use naga::Module;
use nativekit_gpu::ShaderStage;
use tracing::{debug, warn};

use crate::conventions::negate_derivative_y;
use crate::reflect::{self, naga_stage, StageReflection};
use crate::{Result, ShaderError, ShaderTarget};

const ENTRY_POINT: &str = "main";

/// One compiled stage: native code plus what reflection found in it.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub reflection: StageReflection,
    pub code: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub vertex: CompiledShader,
    pub fragment: CompiledShader,
}

/// Compiles vertex/fragment pairs for one native target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderCompiler {
    target: ShaderTarget,
}

impl ShaderCompiler {
    pub fn new(target: ShaderTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> ShaderTarget {
        self.target
    }

    /// Compile and link a program.
    ///
    /// The fragment source has its vertical derivatives negated before
    /// parsing.
    pub fn compile(&self, vertex_source: &str, fragment_source: &str) -> Result<CompiledProgram> {
        let vertex = parse(ShaderStage::Vertex, vertex_source)?;
        let fragment = parse(ShaderStage::Fragment, &negate_derivative_y(fragment_source))?;

        let vertex_info = validate(ShaderStage::Vertex, &vertex)?;
        let fragment_info = validate(ShaderStage::Fragment, &fragment)?;

        link(&vertex, &fragment)?;

        let program = CompiledProgram {
            vertex: CompiledShader {
                stage: ShaderStage::Vertex,
                reflection: reflect::reflect(ShaderStage::Vertex, &vertex)?,
                code: self.translate(ShaderStage::Vertex, &vertex, &vertex_info)?,
            },
            fragment: CompiledShader {
                stage: ShaderStage::Fragment,
                reflection: reflect::reflect(ShaderStage::Fragment, &fragment)?,
                code: self.translate(ShaderStage::Fragment, &fragment, &fragment_info)?,
            },
        };

        debug!(
            target = ?self.target,
            vertex_bytes = program.vertex.code.len(),
            fragment_bytes = program.fragment.code.len(),
            "Compiled program"
        );
        Ok(program)
    }

    fn translate(&self, stage: ShaderStage, module: &Module, info: &ModuleInfo) -> Result<Vec<u8>> {
        let translate_err = |message: String| ShaderError::Translate { stage, message };

        match self.target {
            ShaderTarget::SpirV => {
                let pipeline = spv::PipelineOptions {
                    shader_stage: naga_stage(stage),
                    entry_point: ENTRY_POINT.into(),
                };
                let words = spv::write_vec(module, info, &spv::Options::default(), Some(&pipeline))
                    .map_err(|e| translate_err(e.to_string()))?;
                Ok(bytemuck::cast_slice::<u32, u8>(&words).to_vec())
            }
            ShaderTarget::Glsl => write_glsl(stage, module, info, glsl_out::Version::Desktop(430)),
            ShaderTarget::GlslEs => write_glsl(
                stage,
                module,
                info,
                glsl_out::Version::Embedded {
                    version: 300,
                    is_webgl: false,
                },
            ),
        }
    }
}

fn parse(stage: ShaderStage, source: &str) -> Result<Module> {
    let options = glsl_in::Options::from(naga_stage(stage));
    glsl_in::Frontend::default()
        .parse(&options, source)
        .map_err(|err| {
            let message = err
                .errors
                .iter()
                .map(|e| e.kind.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(?stage, %message, "Shader parse failed");
            ShaderError::Parse { stage, message }
        })
}

fn validate(stage: ShaderStage, module: &Module) -> Result<ModuleInfo> {
    Validator::new(ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(module)
        .map_err(|err| ShaderError::Validation {
            stage,
            message: err.into_inner().to_string(),
        })
}

/// Every location the fragment stage reads must be written by the vertex
/// stage with the same type.
fn link(vertex: &Module, fragment: &Module) -> Result<()> {
    let outputs = reflect::interface(vertex, naga::ShaderStage::Vertex);
    for (location, name, ty) in reflect::interface(fragment, naga::ShaderStage::Fragment) {
        match outputs.iter().find(|(out_location, ..)| *out_location == location) {
            Some((_, _, out_ty)) if *out_ty == ty => {}
            Some(_) => {
                return Err(ShaderError::Link(format!(
                    "type mismatch for '{name}' at location {location}"
                )))
            }
            None => {
                return Err(ShaderError::Link(format!(
                    "fragment input '{name}' at location {location} is not written by the vertex stage"
                )))
            }
        }
    }
    Ok(())
}

fn write_glsl(
    stage: ShaderStage,
    module: &Module,
    info: &ModuleInfo,
    version: glsl_out::Version,
) -> Result<Vec<u8>> {
    let options = glsl_out::Options {
        version,
        ..glsl_out::Options::default()
    };
    let pipeline = glsl_out::PipelineOptions {
        shader_stage: naga_stage(stage),
        entry_point: ENTRY_POINT.into(),
        multiview: None,
    };

    let mut text = String::new();
    let mut writer = glsl_out::Writer::new(
        &mut text,
        module,
        info,
        &options,
        &pipeline,
        naga::proc::BoundsCheckPolicies::default(),
    )
    .map_err(|e| ShaderError::Translate {
        stage,
        message: e.to_string(),
    })?;
    writer.write().map_err(|e| ShaderError::Translate {
        stage,
        message: e.to_string(),
    })?;
    drop(writer);

    Ok(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FRAGMENT, FRAGMENT_UNLINKED, VERTEX};

    #[test]
    fn test_compile_spirv() {
        let program = ShaderCompiler::default().compile(VERTEX, FRAGMENT).unwrap();

        let magic = u32::from_le_bytes(program.vertex.code[..4].try_into().unwrap());
        assert_eq!(magic, 0x0723_0203);
        assert_eq!(program.vertex.code.len() % 4, 0);
        assert_eq!(program.fragment.stage, ShaderStage::Fragment);
    }

    #[test]
    fn test_reflection() {
        let program = ShaderCompiler::default().compile(VERTEX, FRAGMENT).unwrap();

        let block = program.vertex.reflection.uniform_block.as_ref().unwrap();
        let names: Vec<_> = block.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["worldViewProjection", "brightness"]);
        assert_eq!(block.members[0].offset, 0);
        assert_eq!(block.members[0].columns, 4);
        assert_eq!(block.members[1].offset, 64);
        assert_eq!(block.members[1].vec_size, 1);
        assert!(block.size >= 68);

        let inputs: Vec<_> = program
            .vertex
            .reflection
            .inputs
            .iter()
            .map(|i| (i.name.as_str(), i.location))
            .collect();
        assert_eq!(inputs, [("a_position", 0), ("a_texcoord0", 10)]);

        let samplers = &program.fragment.reflection.samplers;
        assert_eq!(samplers.len(), 1);
        assert_eq!(samplers[0].name, "albedo");
        assert_eq!(samplers[0].binding, 2);
        assert!(program.fragment.reflection.uniform_block.is_none());
        assert!(program.fragment.reflection.inputs.is_empty());
    }

    #[test]
    fn test_compile_glsl_text() {
        let compiler = ShaderCompiler::new(ShaderTarget::Glsl);
        let program = compiler.compile(VERTEX, FRAGMENT).unwrap();
        let text = String::from_utf8(program.vertex.code).unwrap();
        assert!(text.starts_with("#version 430"));
    }

    #[test]
    fn test_parse_error() {
        let err = ShaderCompiler::default()
            .compile("#version 450\nvoid main() { undefined_call(); }", FRAGMENT)
            .unwrap_err();
        assert!(matches!(
            err,
            ShaderError::Parse {
                stage: ShaderStage::Vertex,
                ..
            }
        ));
    }

    #[test]
    fn test_link_error() {
        let err = ShaderCompiler::default()
            .compile(VERTEX, FRAGMENT_UNLINKED)
            .unwrap_err();
        assert!(matches!(err, ShaderError::Link(_)));
    }
}
