//! Reflection over a parsed shader module.

use naga::{AddressSpace, ArraySize, Binding, Handle, Module, ScalarKind, Type, TypeInner};
use nativekit_gpu::ShaderStage;

use crate::ShaderError;

/// A member of the stage's uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    /// Byte offset within the block.
    pub offset: u32,
    pub is_float: bool,
    /// 1 for scalars and vectors.
    pub columns: u32,
    /// Components per column.
    pub vec_size: u32,
    /// Array dimensions, outermost first.
    pub array_dims: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlock {
    pub name: Option<String>,
    pub binding: Option<u32>,
    /// Declared size of the block in bytes.
    pub size: u32,
    pub members: Vec<UniformMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerInfo {
    pub name: String,
    pub binding: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub name: String,
    pub location: u32,
}

/// What one compiled stage exposes to the binding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReflection {
    pub stage: ShaderStage,
    pub uniform_block: Option<UniformBlock>,
    pub samplers: Vec<SamplerInfo>,
    /// Vertex stage inputs ordered by location; empty for fragment shaders.
    pub inputs: Vec<StageInput>,
}

pub(crate) fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

pub(crate) fn reflect(stage: ShaderStage, module: &Module) -> Result<StageReflection, ShaderError> {
    let mut blocks = Vec::new();
    let mut samplers = Vec::new();

    for (_, global) in module.global_variables.iter() {
        match (global.space, &module.types[global.ty].inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                let members = members
                    .iter()
                    .map(|member| {
                        let shape = describe(module, member.ty);
                        UniformMember {
                            name: member.name.clone().unwrap_or_default(),
                            offset: member.offset,
                            is_float: shape.is_float,
                            columns: shape.columns,
                            vec_size: shape.vec_size,
                            array_dims: shape.array_dims,
                        }
                    })
                    .collect();
                blocks.push(UniformBlock {
                    name: module.types[global.ty].name.clone(),
                    binding: global.binding.as_ref().map(|b| b.binding),
                    size: *span,
                    members,
                });
            }
            (AddressSpace::Handle, TypeInner::Sampler { .. }) => {
                samplers.push(SamplerInfo {
                    name: global.name.clone().unwrap_or_default(),
                    binding: global.binding.as_ref().map_or(0, |b| b.binding),
                });
            }
            _ => {}
        }
    }

    if blocks.len() > 1 {
        return Err(ShaderError::TooManyUniformBlocks {
            stage,
            count: blocks.len(),
        });
    }

    let inputs = match stage {
        ShaderStage::Vertex => stage_inputs(module, naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Vec::new(),
    };

    Ok(StageReflection {
        stage,
        uniform_block: blocks.pop(),
        samplers,
        inputs,
    })
}

struct Shape {
    is_float: bool,
    columns: u32,
    vec_size: u32,
    array_dims: Vec<u32>,
}

fn describe(module: &Module, ty: Handle<Type>) -> Shape {
    let float = |kind: ScalarKind| kind == ScalarKind::Float;
    match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => Shape {
            is_float: float(scalar.kind),
            columns: 1,
            vec_size: 1,
            array_dims: Vec::new(),
        },
        TypeInner::Vector { size, scalar } => Shape {
            is_float: float(scalar.kind),
            columns: 1,
            vec_size: *size as u32,
            array_dims: Vec::new(),
        },
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => Shape {
            is_float: float(scalar.kind),
            columns: *columns as u32,
            vec_size: *rows as u32,
            array_dims: Vec::new(),
        },
        TypeInner::Array { base, size, .. } => {
            let mut shape = describe(module, *base);
            let len = match size {
                ArraySize::Constant(len) => len.get(),
                _ => 1,
            };
            shape.array_dims.insert(0, len);
            shape
        }
        _ => Shape {
            is_float: false,
            columns: 0,
            vec_size: 0,
            array_dims: Vec::new(),
        },
    }
}

fn stage_inputs(module: &Module, stage: naga::ShaderStage) -> Vec<StageInput> {
    let mut inputs: Vec<StageInput> = module
        .entry_points
        .iter()
        .filter(|entry| entry.stage == stage)
        .flat_map(|entry| entry.function.arguments.iter())
        .filter_map(|argument| match argument.binding {
            Some(Binding::Location { location, .. }) => Some(StageInput {
                name: argument.name.clone().unwrap_or_default(),
                location,
            }),
            _ => None,
        })
        .collect();
    inputs.sort_by_key(|input| input.location);
    inputs
}

/// Location-bound values flowing between stages: vertex outputs or fragment inputs.
pub(crate) fn interface(module: &Module, stage: naga::ShaderStage) -> Vec<(u32, String, TypeInner)> {
    let mut found = Vec::new();
    for entry in module.entry_points.iter().filter(|entry| entry.stage == stage) {
        match stage {
            naga::ShaderStage::Vertex => {
                let Some(result) = entry.function.result.as_ref() else {
                    continue;
                };
                if let Some(Binding::Location { location, .. }) = result.binding {
                    found.push((location, String::new(), module.types[result.ty].inner.clone()));
                } else if let TypeInner::Struct { members, .. } = &module.types[result.ty].inner {
                    for member in members {
                        if let Some(Binding::Location { location, .. }) = member.binding {
                            found.push((
                                location,
                                member.name.clone().unwrap_or_default(),
                                module.types[member.ty].inner.clone(),
                            ));
                        }
                    }
                }
            }
            _ => {
                for argument in &entry.function.arguments {
                    if let Some(Binding::Location { location, .. }) = argument.binding {
                        found.push((
                            location,
                            argument.name.clone().unwrap_or_default(),
                            module.types[argument.ty].inner.clone(),
                        ));
                    }
                }
            }
        }
    }
    found
}
