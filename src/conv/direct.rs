//! Direct convolution with padding and stride.

use super::{output_dim, ConvShape, Convolver, Padding, Stride};
use crate::error::MarlinResult;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectConvolver {
    padding: Padding,
    stride: Stride,
}

impl DirectConvolver {
    pub fn new(padding: Padding, stride: Stride) -> Self {
        Self { padding, stride }
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn stride(&self) -> Stride {
        self.stride
    }

    /// `[batch, M, P, Q]` for the given input and filter shapes.
    pub fn output_shape(&self, input: &Tensor<'_>, filter: &Tensor<'_>) -> MarlinResult<[usize; 4]> {
        let s = ConvShape::of(input, filter)?;
        self.shape_of(&s)
    }

    fn shape_of(&self, s: &ConvShape) -> MarlinResult<[usize; 4]> {
        let p = self.padding;
        let oh = output_dim(s.height, s.filter_h, p.top, p.bottom, self.stride.h)?;
        let ow = output_dim(s.width, s.filter_w, p.left, p.right, self.stride.w)?;
        Ok([s.batch, s.filters, oh, ow])
    }
}

impl Convolver for DirectConvolver {
    fn run(&self, filter: &Tensor<'_>, input: &Tensor<'_>, output: &mut Tensor<'_>) -> MarlinResult<()> {
        let s = ConvShape::of(input, filter)?;
        let [_, _, oh, ow] = self.shape_of(&s)?;
        output.resize(&[s.batch, s.filters, oh, ow])?;
        let out = output.mutable_data()?;
        out.fill(0.0);

        let (x, f) = (input.data(), filter.data());
        let (ih, iw) = (s.height as isize, s.width as isize);
        let (pt, pl) = (self.padding.top as isize, self.padding.left as isize);
        let in_plane = s.height * s.width;
        let f_plane = s.filter_h * s.filter_w;

        for n in 0..s.batch {
            for m in 0..s.filters {
                let dst = &mut out[(n * s.filters + m) * oh * ow..][..oh * ow];
                for c in 0..s.channels {
                    let src = &x[(n * s.channels + c) * in_plane..][..in_plane];
                    let g = &f[(m * s.channels + c) * f_plane..][..f_plane];
                    for i in 0..oh {
                        for j in 0..ow {
                            let mut acc = dst[i * ow + j];
                            for r in 0..s.filter_h {
                                let y = (i * self.stride.h + r) as isize - pt;
                                if y < 0 || y >= ih {
                                    continue;
                                }
                                for q in 0..s.filter_w {
                                    let xx = (j * self.stride.w + q) as isize - pl;
                                    if xx < 0 || xx >= iw {
                                        continue;
                                    }
                                    acc += src[y as usize * s.width + xx as usize] * g[r * s.filter_w + q];
                                }
                            }
                            dst[i * ow + j] = acc;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_filter() {
        let x: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let input = Tensor::from_vec(&[1, 1, 4, 4], x.clone()).unwrap();
        let mut g = vec![0.0; 9];
        g[4] = 1.0;
        let filter = Tensor::from_vec(&[1, 1, 3, 3], g).unwrap();
        let mut out = Tensor::new();
        DirectConvolver::new(Padding::uniform(1), Stride::default()).run(&filter, &input, &mut out).unwrap();
        assert_eq!(out.shape(), &[1, 1, 4, 4]);
        assert_eq!(out.data(), &x[..]);
    }

    #[test]
    fn test_box_filter_and_stride() {
        let input = Tensor::from_vec(&[1, 2, 4, 4], vec![1.0; 32]).unwrap();
        let filter = Tensor::from_vec(&[3, 2, 2, 2], vec![1.0; 24]).unwrap();
        let mut out = Tensor::new();
        let conv = DirectConvolver::new(Padding::default(), Stride { h: 2, w: 2 });
        conv.run(&filter, &input, &mut out).unwrap();
        assert_eq!(out.shape(), &[1, 3, 2, 2]);
        assert!(out.data().iter().all(|&v| v == 8.0));
    }

    #[test]
    fn test_channel_mismatch() {
        let input = Tensor::zeros(&[1, 2, 4, 4]).unwrap();
        let filter = Tensor::zeros(&[1, 3, 3, 3]).unwrap();
        let mut out = Tensor::new();
        assert!(DirectConvolver::default().run(&filter, &input, &mut out).is_err());
    }
}
