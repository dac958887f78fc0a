//! Utilities.
mod named_tensors;
mod summary;
use feudal_core::record::{Record, RecordValue};
use log::trace;
pub use named_tensors::NamedTensors;
use std::convert::TryFrom;
pub use summary::{activation_summary, kernels_on_grid, sparsity, tensor_to_vec};
use tch::{nn, nn::VarStore, Kind, Tensor};

/// Returns the mean and standard deviation of the parameters.
pub fn param_stats(var_store: &VarStore) -> Record {
    let mut record = Record::empty();

    for (k, v) in var_store.variables() {
        let m = f32::try_from(v.mean(Kind::Float)).unwrap_or(f32::NAN);
        record.insert(format!("{}_mean", &k), RecordValue::Scalar(m));

        let s = f32::try_from(v.std(false)).unwrap_or(f32::NAN);
        record.insert(format!("{}_std", k), RecordValue::Scalar(s));
    }

    record
}

/// Square root of the sum of squared L2 norms of the tensors.
pub fn global_norm(tensors: &[Tensor]) -> f64 {
    tch::no_grad(|| {
        tensors
            .iter()
            .filter(|t| t.defined())
            .map(|t| t.pow_tensor_scalar(2).sum(Kind::Double).double_value(&[]))
            .sum::<f64>()
            .sqrt()
    })
}

/// Rescales gradients of `vars` so that their global norm is at most `max_norm`.
///
/// Returns the global norm before rescaling.
pub fn clip_global_norm(vars: &[Tensor], max_norm: f64) -> f64 {
    let grads = vars.iter().map(|v| v.grad()).collect::<Vec<_>>();
    let norm = global_norm(&grads);
    if norm > max_norm {
        let scale = max_norm / norm;
        tch::no_grad(|| {
            for mut g in grads.into_iter().filter(|g| g.defined()) {
                let _ = g.g_mul_scalar_(scale);
            }
        });
    }
    trace!("global norm of gradients: {}", norm);
    norm
}

/// Clips the gradient of `var` to `g * clip / max(|g|_2 / numel(g), clip)`.
pub fn clip_average_norm(var: &Tensor, clip: f64) {
    let mut g = var.grad();
    if !g.defined() {
        return;
    }
    tch::no_grad(|| {
        let avg_norm = global_norm(&[g.shallow_clone()]) / g.numel() as f64;
        if avg_norm > clip {
            let _ = g.g_mul_scalar_(clip / avg_norm);
        }
    });
}

/// Creates a variable of shape `[n_in, n_out]` whose columns are standard normal
/// samples rescaled to L2 norm `std`.
pub fn normalized_columns(p: &nn::Path, name: &str, n_in: i64, n_out: i64, std: f64) -> Tensor {
    let mut w = p.var(
        name,
        &[n_in, n_out],
        nn::Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        },
    );
    tch::no_grad(|| {
        let norm = w
            .pow_tensor_scalar(2)
            .sum_dim_intlist(Some([0].as_slice()), true, Kind::Float)
            .sqrt();
        let v = &w * std / norm;
        w.copy_(&v);
    });
    w
}

/// Normalizes rows (`dim = 1`) or columns (`dim = 0`) to unit L2 norm.
pub fn l2_normalize(xs: &Tensor, dim: i64) -> Tensor {
    let norm = xs
        .pow_tensor_scalar(2)
        .sum_dim_intlist(Some([dim].as_slice()), true, Kind::Float)
        .clamp_min(1e-12)
        .sqrt();
    xs / norm
}

/// Index of the first cumulative probability exceeding `u`, drawn uniformly from `[0, 1)`.
///
/// Falls back to the last index when rounding keeps the cumulative sum below `u`.
pub fn sample_categorical(probs: &[f32], u: f32) -> i64 {
    let mut acc = 0f32;
    for (i, p) in probs.iter().enumerate() {
        acc += p;
        if u < acc {
            return i as i64;
        }
    }
    probs.len() as i64 - 1
}
