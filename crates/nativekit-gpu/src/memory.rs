//! Owned data handed to the command-buffer API.

/// Bytes whose ownership moves into the backend.
///
/// The backend drops the memory once the GPU copy exists; for decoded
/// textures this is the point the CPU-side image is released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Copy a borrowed slice.
    pub fn copy(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Take ownership of an existing buffer without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Memory {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}
