//! 2D convolution over NCHW tensors.
//!
//! Input `[batch][C][H][W]`, filter `[M][C][R][S]`, output `[batch][M][P][Q]`.
//! [`DirectConvolver`] is the straightforward loop used as the oracle;
//! [`Winograd`] computes 3×3 stride-1 convolutions with F(2,3).

pub mod direct;
pub mod winograd;

pub use direct::DirectConvolver;
pub use winograd::{MultiplyStrategy, Winograd, WinogradKernel, WinogradPlan, WinogradTile};

use crate::error::{MarlinError, MarlinResult};
use crate::tensor::Tensor;

/// Implicit zero padding around each input plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    pub fn uniform(p: usize) -> Self {
        Self { top: p, bottom: p, left: p, right: p }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride {
    pub h: usize,
    pub w: usize,
}

impl Default for Stride {
    fn default() -> Self {
        Self { h: 1, w: 1 }
    }
}

/// `(in + p1 + p2 - f) / s + 1`, or an error when the filter does not fit.
pub fn output_dim(input: usize, filter: usize, p1: usize, p2: usize, stride: usize) -> MarlinResult<usize> {
    if stride == 0 {
        return Err(MarlinError::invalid("convolution stride must be positive"));
    }
    let padded = input + p1 + p2;
    if filter == 0 || filter > padded {
        return Err(MarlinError::invalid(format!(
            "filter extent {filter} does not fit padded input {padded}"
        )));
    }
    Ok((padded - filter) / stride + 1)
}

/// Dimensions of one convolution problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConvShape {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub filters: usize,
    pub filter_h: usize,
    pub filter_w: usize,
}

impl ConvShape {
    pub fn of(input: &Tensor<'_>, filter: &Tensor<'_>) -> MarlinResult<Self> {
        if input.rank() != 4 || filter.rank() != 4 {
            return Err(MarlinError::invalid(format!(
                "convolution expects rank-4 tensors, got input {:?} and filter {:?}",
                input.shape(),
                filter.shape()
            )));
        }
        if input.dim(1) != filter.dim(1) {
            return Err(MarlinError::invalid(format!(
                "input has {} channels, filter has {}",
                input.dim(1),
                filter.dim(1)
            )));
        }
        Ok(Self {
            batch: input.dim(0),
            channels: input.dim(1),
            height: input.dim(2),
            width: input.dim(3),
            filters: filter.dim(0),
            filter_h: filter.dim(2),
            filter_w: filter.dim(3),
        })
    }
}

/// A convolution algorithm: `output = filter ⊛ input`.
pub trait Convolver {
    /// Resizes `output` to the computed shape and overwrites it.
    fn run(&self, filter: &Tensor<'_>, input: &Tensor<'_>, output: &mut Tensor<'_>) -> MarlinResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dim() {
        assert_eq!(output_dim(8, 3, 0, 0, 1).unwrap(), 6);
        assert_eq!(output_dim(8, 3, 1, 1, 1).unwrap(), 8);
        assert_eq!(output_dim(8, 3, 0, 0, 2).unwrap(), 3);
        assert!(output_dim(2, 3, 0, 0, 1).is_err());
        assert!(output_dim(8, 3, 0, 0, 0).is_err());
    }

    #[test]
    fn test_shape_rejects_channel_mismatch() {
        let input = Tensor::zeros(&[1, 3, 4, 4]).unwrap();
        let filter = Tensor::zeros(&[2, 2, 3, 3]).unwrap();
        assert!(matches!(ConvShape::of(&input, &filter), Err(MarlinError::InvalidArgument(_))));
    }
}
