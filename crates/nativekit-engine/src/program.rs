//! Compiled programs and uniform staging.

use std::collections::{BTreeMap, HashMap};

use nativekit_gpu::{GpuBackend, ProgramHandle, ShaderHandle, UniformHandle};
use serde::Serialize;

/// Where a named uniform lives on the native side.
///
/// `stage` is the texture stage for samplers and zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UniformInfo {
    pub stage: u8,
    pub handle: UniformHandle,
}

/// A staged uniform upload: flat floats plus the element count.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformValue {
    pub data: Vec<f32>,
    pub element_count: u16,
}

/// A native program with its name lookups and pending uniform values.
#[derive(Debug)]
pub struct ProgramData {
    handle: ProgramHandle,
    vertex_uniforms: HashMap<String, UniformInfo>,
    fragment_uniforms: HashMap<String, UniformInfo>,
    attribute_locations: HashMap<String, u32>,
    uniforms: BTreeMap<UniformHandle, UniformValue>,
}

impl ProgramData {
    pub fn new(
        handle: ProgramHandle,
        vertex_uniforms: HashMap<String, UniformInfo>,
        fragment_uniforms: HashMap<String, UniformInfo>,
        attribute_locations: HashMap<String, u32>,
    ) -> Self {
        Self {
            handle,
            vertex_uniforms,
            fragment_uniforms,
            attribute_locations,
            uniforms: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    /// Resolve a uniform by name, vertex stage first.
    pub fn uniform(&self, name: &str) -> Option<UniformInfo> {
        self.vertex_uniforms
            .get(name)
            .or_else(|| self.fragment_uniforms.get(name))
            .copied()
    }

    /// Input location of a canonical attribute name.
    pub fn attribute_location(&self, name: &str) -> Option<u32> {
        self.attribute_locations.get(name).copied()
    }

    /// Stage a value for the next draw. The last write wins.
    pub fn set_uniform(&mut self, handle: UniformHandle, data: Vec<f32>, element_count: u16) {
        self.uniforms.insert(handle, UniformValue { data, element_count });
    }

    /// Staged values. They stay in place across draws until overwritten.
    pub fn pending_uniforms(&self) -> impl Iterator<Item = (UniformHandle, &UniformValue)> {
        self.uniforms.iter().map(|(handle, value)| (*handle, value))
    }
}

/// Map every uniform a shader declares to its [`UniformInfo`].
pub fn collect_uniforms<B: GpuBackend>(
    backend: &B,
    shader: ShaderHandle,
    sampler_stages: &HashMap<String, u8>,
) -> HashMap<String, UniformInfo> {
    backend
        .shader_uniforms(shader)
        .into_iter()
        .filter_map(|handle| {
            let desc = backend.uniform_info(handle)?;
            let stage = sampler_stages.get(&desc.name).copied().unwrap_or(0);
            Some((desc.name, UniformInfo { stage, handle }))
        })
        .collect()
}

// ==================== Value layout ====================

/// Pad every `size`-component element of `values` to four floats.
///
/// A trailing partial element is dropped. Returns `None` when the element
/// count does not fit an upload.
pub fn pad_to_vec4(values: &[f32], size: usize) -> Option<(Vec<f32>, u16)> {
    let count = u16::try_from(values.len() / size).ok()?;
    let mut padded = Vec::with_capacity(usize::from(count) * 4);
    for element in values.chunks_exact(size) {
        padded.extend_from_slice(element);
        padded.resize(padded.len() + 4 - size, 0.0);
    }
    Some((padded, count))
}

/// Expand a row-major `size`x`size` matrix into a 4x4 with zero padding.
///
/// Returns `None` unless `values` holds exactly `size * size` floats.
pub fn expand_matrix(values: &[f32], size: usize) -> Option<Vec<f32>> {
    if values.len() != size * size {
        return None;
    }
    let mut matrix = vec![0.0; 16];
    for (line, row) in values.chunks_exact(size).enumerate() {
        matrix[line * 4..line * 4 + size].copy_from_slice(row);
    }
    Some(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> ProgramData {
        let uniform = |index| UniformInfo {
            stage: 0,
            handle: UniformHandle::from_raw(index),
        };
        let vertex = HashMap::from([("shared".to_string(), uniform(0)), ("world".to_string(), uniform(1))]);
        let fragment = HashMap::from([
            ("shared".to_string(), uniform(5)),
            ("tint".to_string(), uniform(2)),
        ]);
        let attributes = HashMap::from([("position".to_string(), 0)]);
        ProgramData::new(ProgramHandle::from_raw(0), vertex, fragment, attributes)
    }

    #[test]
    fn test_lookup_prefers_vertex_stage() {
        let program = program();
        assert_eq!(program.uniform("shared").unwrap().handle.index(), 0);
        assert_eq!(program.uniform("tint").unwrap().handle.index(), 2);
        assert!(program.uniform("missing").is_none());
        assert_eq!(program.attribute_location("position"), Some(0));
        assert_eq!(program.attribute_location("normal"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let mut program = program();
        let handle = UniformHandle::from_raw(1);
        program.set_uniform(handle, vec![1.0; 4], 1);
        program.set_uniform(handle, vec![2.0; 4], 1);

        let pending: Vec<_> = program.pending_uniforms().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.data, vec![2.0; 4]);
    }

    #[test]
    fn test_pad_to_vec4() {
        let (padded, count) = pad_to_vec4(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(count, 2);
        assert_eq!(padded, vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);

        let (padded, count) = pad_to_vec4(&[7.0, 8.0], 1).unwrap();
        assert_eq!(count, 2);
        assert_eq!(padded, vec![7.0, 0.0, 0.0, 0.0, 8.0, 0.0, 0.0, 0.0]);

        let (padded, count) = pad_to_vec4(&[1.0, 2.0, 3.0, 4.0], 4).unwrap();
        assert_eq!(count, 1);
        assert_eq!(padded, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_pad_to_vec4_rejects_oversized_arrays() {
        let values = vec![0.0; (usize::from(u16::MAX) + 1) * 2];
        assert!(pad_to_vec4(&values, 2).is_none());
        assert_eq!(pad_to_vec4(&values[..2 * usize::from(u16::MAX)], 2).unwrap().1, u16::MAX);
    }

    #[test]
    fn test_expand_matrix3x3() {
        let values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let matrix = expand_matrix(&values, 3).unwrap();
        assert_eq!(
            matrix,
            vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_expand_matrix2x2() {
        let matrix = expand_matrix(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(&matrix[0..2], &[1.0, 2.0]);
        assert_eq!(&matrix[4..6], &[3.0, 4.0]);
        assert_eq!(matrix.iter().filter(|&&v| v != 0.0).count(), 4);
    }

    #[test]
    fn test_expand_matrix_requires_exact_length() {
        assert!(expand_matrix(&[1.0, 2.0], 2).is_none());
        assert!(expand_matrix(&[1.0; 16], 3).is_none());
        assert!(expand_matrix(&[1.0; 9], 3).is_some());
    }
}
