//! Conversion of tensors into record values for tensorboard.
use anyhow::Result;
use feudal_core::record::{Record, RecordValue};
use std::convert::TryFrom;
use tch::{Device, Kind, Tensor};

/// Flattens a tensor into a vector of `f32` on CPU.
pub fn tensor_to_vec(t: &Tensor) -> Result<Vec<f32>> {
    let t = t.detach().to(Device::Cpu).to_kind(Kind::Float).flatten(0, -1);
    Ok(Vec::<f32>::try_from(&t)?)
}

/// Fraction of zero elements.
pub fn sparsity(t: &Tensor) -> f32 {
    tch::no_grad(|| t.eq(0.0).to_kind(Kind::Float).mean(Kind::Float).double_value(&[]) as f32)
}

/// Histogram and sparsity of an activation, under keys `name` and `name/sparsity`.
pub fn activation_summary(name: &str, t: &Tensor) -> Result<Record> {
    Ok(Record::from_slice(&[
        (name.to_string(), RecordValue::Array1(tensor_to_vec(t)?)),
        (format!("{}/sparsity", name), RecordValue::Scalar(sparsity(t))),
    ]))
}

// Largest `i <= sqrt(n)` dividing `n`, with its cofactor.
fn factorization(n: i64) -> (i64, i64) {
    let mut i = (n as f64).sqrt() as i64;
    while i > 1 && n % i != 0 {
        i -= 1;
    }
    let i = i.max(1);
    (i, n / i)
}

/// Places convolution kernels `[out, in, kh, kw]` into one image.
///
/// Kernels are scaled to `[0, 1]`, padded with one black pixel and tiled in a
/// grid of `grid_y * grid_x = out` cells. The image has one channel, or three
/// if the kernels read RGB input. Returns the pixels and `[channels, height, width]`.
pub fn kernels_on_grid(kernel: &Tensor) -> Result<(Vec<f32>, [usize; 3])> {
    let pad = 1;
    let (n_out, n_in, kh, kw) = kernel.size4()?;
    let (grid_y, grid_x) = factorization(n_out);

    let image = tch::no_grad(|| {
        let x_min = kernel.min();
        let x_max = kernel.max();
        let k = (kernel - &x_min) / (x_max - &x_min).clamp_min(1e-12);
        let k = k.constant_pad_nd([pad, pad, pad, pad]);
        let k = if n_in == 1 || n_in == 3 {
            k
        } else {
            k.mean_dim(Some([1].as_slice()), true, Kind::Float)
        };
        let c = k.size()[1];
        let (y, x) = (kh + 2 * pad, kw + 2 * pad);
        k.view([grid_y, grid_x, c, y, x])
            .permute([2, 0, 3, 1, 4])
            .contiguous()
            .view([c, grid_y * y, grid_x * x])
    });

    let shape = image.size();
    let shape = [shape[0] as usize, shape[1] as usize, shape[2] as usize];
    Ok((tensor_to_vec(&image)?, shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factorization() {
        assert_eq!(factorization(32), (4, 8));
        assert_eq!(factorization(16), (4, 4));
        assert_eq!(factorization(7), (1, 7));
    }

    #[test]
    fn test_kernels_on_grid_shape() {
        let kernel = Tensor::randn(&[32, 4, 5, 5], (Kind::Float, Device::Cpu));
        let (data, shape) = kernels_on_grid(&kernel).unwrap();
        assert_eq!(shape, [1, 4 * 7, 8 * 7]);
        assert_eq!(data.len(), 28 * 56);
        assert!(data.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_activation_summary() {
        let t = Tensor::from_slice(&[0f32, 1.0, 0.0, 2.0]);
        let record = activation_summary("percept", &t).unwrap();
        assert_eq!(record.get_scalar("percept/sparsity").unwrap(), 0.5);
        assert_eq!(record.get_array1("percept").unwrap().len(), 4);
    }
}
