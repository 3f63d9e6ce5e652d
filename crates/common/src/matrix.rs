use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::{CommonError, Transform};

/// Tag prefixed to the text encoding. Bump when the layout changes.
const TEXT_TAG: &str = "m1";

/// Affine 4x4 transform stored as 16 column-major floats.
///
/// Serializes as a flat list of floats. Position lives in column 3, the
/// magnitudes of columns 0..3 are the non-uniform scale.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Pod, Zeroable)]
pub struct TransformMatrix(pub [f32; 16]);

impl TransformMatrix {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn from_mat4(m: Mat4) -> Self {
        Self(m.to_cols_array())
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array(&self.0)
    }

    pub fn from_translation(position: Vec3) -> Self {
        Self::from_mat4(Mat4::from_translation(position))
    }

    pub fn from_transform(t: &Transform) -> Self {
        Self::from_mat4(Mat4::from_scale_rotation_translation(
            t.scale, t.rotation, t.position,
        ))
    }

    /// World-space position (column 3).
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.0[12], self.0[13], self.0[14])
    }

    /// Split into position, rotation and per-axis scale.
    pub fn decompose(&self) -> Transform {
        let (scale, rotation, position) = self.to_mat4().to_scale_rotation_translation();
        Transform {
            position,
            rotation,
            scale,
        }
    }

    /// Text form: `m1:` followed by the 16 floats joined with `;`.
    ///
    /// Floats are written with their shortest exact representation, so
    /// decoding yields bit-identical values.
    pub fn encode_text(&self) -> String {
        let body: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        format!("{TEXT_TAG}:{}", body.join(";"))
    }

    pub fn decode_text(s: &str) -> Result<Self, CommonError> {
        let (tag, body) = s
            .split_once(':')
            .ok_or_else(|| CommonError::UnsupportedEncoding(String::new()))?;
        if tag != TEXT_TAG {
            return Err(CommonError::UnsupportedEncoding(tag.to_string()));
        }
        let parts: Vec<&str> = body.split(';').collect();
        if parts.len() != 16 {
            return Err(CommonError::ComponentCount { found: parts.len() });
        }
        let mut out = [0.0f32; 16];
        for (index, part) in parts.iter().enumerate() {
            out[index] = part.trim().parse().map_err(|_| CommonError::InvalidFloat {
                index,
                value: part.to_string(),
            })?;
        }
        Ok(Self(out))
    }

    /// Little-endian binary form, 64 bytes.
    pub fn encode_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.0.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, CommonError> {
        if bytes.len() != 64 {
            return Err(CommonError::ByteLength(bytes.len()));
        }
        let mut out = [0.0f32; 16];
        for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Self(out))
    }
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}
