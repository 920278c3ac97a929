//! Host-side kernel results and the readback helpers that produce them.
//!
//! A device hands back a flat buffer sized to its backing surface. Turning
//! that into a result is always the same three steps: reinterpret the raw
//! bytes if the target was not read natively as floats, truncate the surface
//! padding away, then reshape along the declared axes with axis 0 fastest.

/// A kernel result read back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// One axis.
    Flat(Vec<f32>),
    /// Two axes: rows of length `dims[0]`.
    Rows(Vec<Vec<f32>>),
    /// Three axes: slices of rows.
    Slices(Vec<Vec<Vec<f32>>>),
}

impl Output {
    /// Reshapes `flat` per `dims` (axis 0 fastest).
    ///
    /// `flat` is truncated to the product of `dims` first; any backing-surface
    /// padding beyond that count is discarded.
    pub fn from_flat(mut flat: Vec<f32>, dims: &[usize]) -> Self {
        flat.truncate(dims.iter().product());
        match *dims {
            [x, y, _] => Self::Slices(
                flat.chunks((x * y).max(1))
                    .map(|block| split_rows(block, x))
                    .collect(),
            ),
            [x, _] => Self::Rows(split_rows(&flat, x)),
            _ => Self::Flat(flat),
        }
    }

    /// The result's shape, outermost axis first.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Flat(v) => vec![v.len()],
            Self::Rows(rows) => vec![rows.len(), rows.first().map_or(0, Vec::len)],
            Self::Slices(slices) => {
                let rows = slices.first().map_or(0, Vec::len);
                let cols = slices
                    .first()
                    .and_then(|s| s.first())
                    .map_or(0, Vec::len);
                vec![slices.len(), rows, cols]
            }
        }
    }

    /// All elements in row-major order.
    pub fn flatten(&self) -> Vec<f32> {
        match self {
            Self::Flat(v) => v.clone(),
            Self::Rows(rows) => rows.concat(),
            Self::Slices(slices) => slices.iter().flat_map(|s| s.concat()).collect(),
        }
    }

    /// The flat data, if this is a one-axis result.
    pub fn as_flat(&self) -> Option<&[f32]> {
        match self {
            Self::Flat(v) => Some(v),
            _ => None,
        }
    }

    /// The rows, if this is a two-axis result.
    pub fn as_rows(&self) -> Option<&[Vec<f32>]> {
        match self {
            Self::Rows(r) => Some(r),
            _ => None,
        }
    }

    /// The slices, if this is a three-axis result.
    pub fn as_slices(&self) -> Option<&[Vec<Vec<f32>>]> {
        match self {
            Self::Slices(s) => Some(s),
            _ => None,
        }
    }
}

fn split_rows(flat: &[f32], width: usize) -> Vec<Vec<f32>> {
    flat.chunks(width.max(1)).map(<[f32]>::to_vec).collect()
}

/// Reinterprets raw little-endian bytes (4 per element) as `f32`s.
///
/// A trailing partial element is dropped.
pub fn bytes_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// The little-endian byte image of `data`, 4 bytes per element.
pub fn f32_to_bytes(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_truncated() {
        let out = Output::from_flat(vec![1.0, 2.0, 3.0, 0.0, 0.0], &[3]);
        assert_eq!(out, Output::Flat(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn bytes_reinterpret_sign_and_magnitude() {
        let values = [0.0f32, 1.0, -1.0, 1e30];
        assert_eq!(bytes_to_f32(&f32_to_bytes(&values)), values);
    }
}
