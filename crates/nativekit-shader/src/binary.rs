//! Assembly of [`ShaderBinary`] containers from compiled stages.

use std::collections::HashMap;

use nativekit_gpu::{Attrib, ShaderBinary, ShaderStage, UniformEntry, UniformType};

use crate::conventions::canonical_attribute_name;
use crate::reflect::UniformMember;
use crate::{CompiledShader, Result, ShaderError};

impl CompiledShader {
    /// Build the container handed to the backend.
    ///
    /// Uniform block members come first, in declaration order, followed by
    /// the samplers.
    pub fn to_binary(&self) -> Result<ShaderBinary> {
        let fragment = self.stage == ShaderStage::Fragment;
        let mut binary = ShaderBinary::new(self.stage);

        if let Some(block) = &self.reflection.uniform_block {
            for member in &block.members {
                binary.uniforms.push(block_entry(member, fragment)?);
            }
            binary.uniform_block_size = u16::try_from(block.size).map_err(|_| {
                ShaderError::UnsupportedUniform {
                    name: block.name.clone().unwrap_or_default(),
                    reason: "uniform block too large",
                }
            })?;
        }

        for sampler in &self.reflection.samplers {
            binary.uniforms.push(UniformEntry {
                name: sampler.name.clone(),
                ty: UniformType::Sampler,
                fragment,
                num: 0,
                reg_index: 0,
                reg_count: 0,
            });
        }

        if self.stage == ShaderStage::Vertex {
            for input in &self.reflection.inputs {
                let attrib = Attrib::from_location(input.location).ok_or_else(|| {
                    ShaderError::UnknownAttributeLocation {
                        name: input.name.clone(),
                        location: input.location,
                    }
                })?;
                binary.attributes.push(attrib);
            }
        }

        binary.code = self.code.clone();
        Ok(binary)
    }

    /// Canonical attribute name to input location, vertex stage only.
    pub fn attribute_locations(&self) -> HashMap<String, u32> {
        self.reflection
            .inputs
            .iter()
            .map(|input| (canonical_attribute_name(&input.name).to_string(), input.location))
            .collect()
    }

    /// Sampler name to texture stage. Stages above 255 are rejected.
    pub fn sampler_stages(&self) -> Result<HashMap<String, u8>> {
        self.reflection
            .samplers
            .iter()
            .map(|sampler| {
                let stage = u8::try_from(sampler.binding).map_err(|_| ShaderError::UnsupportedUniform {
                    name: sampler.name.clone(),
                    reason: "sampler binding above 255",
                })?;
                Ok((sampler.name.clone(), stage))
            })
            .collect()
    }
}

fn block_entry(member: &UniformMember, fragment: bool) -> Result<UniformEntry> {
    let unsupported = |reason| ShaderError::UnsupportedUniform {
        name: member.name.clone(),
        reason,
    };

    if !member.is_float {
        return Err(unsupported("non-float member"));
    }

    let (ty, mut reg_count) = match (member.columns, member.vec_size) {
        (1, 1..=4) => (UniformType::Vec4, 1u32),
        (4, 4) => (UniformType::Mat4, 4),
        _ => return Err(unsupported("only vectors and 4x4 matrices are supported")),
    };
    for dim in &member.array_dims {
        reg_count *= dim;
    }

    Ok(UniformEntry {
        name: member.name.clone(),
        ty,
        fragment,
        num: 0,
        reg_index: u16::try_from(member.offset).map_err(|_| unsupported("offset out of range"))?,
        reg_count: u16::try_from(reg_count).map_err(|_| unsupported("array too large"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FRAGMENT, VERTEX};
    use crate::reflect::{SamplerInfo, StageReflection, UniformBlock};
    use crate::ShaderCompiler;

    fn member(name: &str, is_float: bool, columns: u32, vec_size: u32, dims: &[u32]) -> UniformMember {
        UniformMember {
            name: name.into(),
            offset: 16,
            is_float,
            columns,
            vec_size,
            array_dims: dims.to_vec(),
        }
    }

    fn shader_with(members: Vec<UniformMember>) -> CompiledShader {
        CompiledShader {
            stage: ShaderStage::Fragment,
            reflection: StageReflection {
                stage: ShaderStage::Fragment,
                uniform_block: Some(UniformBlock {
                    name: Some("Block".into()),
                    binding: Some(0),
                    size: 256,
                    members,
                }),
                samplers: Vec::new(),
                inputs: Vec::new(),
            },
            code: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn test_binary_from_program() {
        let program = ShaderCompiler::default().compile(VERTEX, FRAGMENT).unwrap();

        let vertex = program.vertex.to_binary().unwrap();
        assert_eq!(vertex.uniforms[0].name, "worldViewProjection");
        assert_eq!(vertex.uniforms[0].ty, UniformType::Mat4);
        assert_eq!(vertex.uniforms[0].reg_count, 4);
        assert_eq!(vertex.uniforms[1].name, "brightness");
        assert_eq!(vertex.uniforms[1].ty, UniformType::Vec4);
        assert_eq!(vertex.uniforms[1].reg_index, 64);
        assert_eq!(vertex.attributes, [Attrib::Position, Attrib::TexCoord0]);
        assert!(!vertex.uniforms[0].fragment);

        let fragment = program.fragment.to_binary().unwrap();
        assert_eq!(fragment.uniforms.len(), 1);
        assert!(fragment.uniforms[0].is_sampler());
        assert!(fragment.uniforms[0].fragment);
        assert!(fragment.attributes.is_empty());
        assert_eq!(fragment.uniform_block_size, 0);

        let parsed = ShaderBinary::parse(&vertex.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, vertex);
    }

    #[test]
    fn test_attribute_locations() {
        let program = ShaderCompiler::default().compile(VERTEX, FRAGMENT).unwrap();
        let locations = program.vertex.attribute_locations();
        assert_eq!(locations.get("position"), Some(&0));
        assert_eq!(locations.get("uv"), Some(&10));
        assert_eq!(program.fragment.sampler_stages().unwrap().get("albedo"), Some(&2));
    }

    #[test]
    fn test_array_register_count() {
        let binary = shader_with(vec![
            member("bones", true, 4, 4, &[3]),
            member("lights", true, 1, 3, &[2, 2]),
        ])
        .to_binary()
        .unwrap();
        assert_eq!(binary.uniforms[0].reg_count, 12);
        assert_eq!(binary.uniforms[1].reg_count, 4);
        assert_eq!(binary.uniforms[1].reg_index, 16);
        assert_eq!(binary.uniform_block_size, 256);
    }

    #[test]
    fn test_rejects_non_float_member() {
        let err = shader_with(vec![member("count", false, 1, 1, &[])])
            .to_binary()
            .unwrap_err();
        assert!(matches!(err, ShaderError::UnsupportedUniform { ref name, .. } if name == "count"));
    }

    #[test]
    fn test_rejects_sampler_binding_past_u8() {
        let mut shader = shader_with(Vec::new());
        shader.reflection.samplers = vec![
            SamplerInfo {
                name: "shadow".into(),
                binding: 255,
            },
            SamplerInfo {
                name: "far".into(),
                binding: 300,
            },
        ];
        let err = shader.sampler_stages().unwrap_err();
        assert!(matches!(err, ShaderError::UnsupportedUniform { ref name, .. } if name == "far"));

        shader.reflection.samplers.pop();
        assert_eq!(shader.sampler_stages().unwrap().get("shadow"), Some(&255));
    }

    #[test]
    fn test_rejects_mat3_member() {
        let err = shader_with(vec![member("normalMatrix", true, 3, 3, &[])])
            .to_binary()
            .unwrap_err();
        assert!(matches!(err, ShaderError::UnsupportedUniform { .. }));
    }
}
