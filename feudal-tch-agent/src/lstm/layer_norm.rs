use tch::{nn, nn::Module, Device, Kind, Tensor};

const FORGET_BIAS: f64 = 1.0;

/// State `(c, h)` of an LSTM cell, each of shape `[1, units]`.
pub struct LstmState {
    pub c: Tensor,
    pub h: Tensor,
}

impl LstmState {
    /// Zero state.
    pub fn zeros(units: i64, device: Device) -> Self {
        Self {
            c: Tensor::zeros(&[1, units], (Kind::Float, device)),
            h: Tensor::zeros(&[1, units], (Kind::Float, device)),
        }
    }

    /// Cuts the state from the computation graph.
    pub fn detach(&self) -> Self {
        Self {
            c: self.c.detach(),
            h: self.h.detach(),
        }
    }
}

impl Clone for LstmState {
    fn clone(&self) -> Self {
        Self {
            c: self.c.shallow_clone(),
            h: self.h.shallow_clone(),
        }
    }
}

/// LSTM cell with layer normalization.
///
/// Gates `i, j, f, o` are computed from `[x, h]` by a linear map without bias
/// and normalized separately:
///
/// ```text
/// c' = LN(c * sigmoid(f + 1) + sigmoid(i) * tanh(j))
/// h' = tanh(c') * sigmoid(o)
/// ```
pub struct LayerNormLstm {
    in_dim: i64,
    units: i64,
    kernel: nn::Linear,
    ln_gates: Vec<nn::LayerNorm>,
    ln_state: nn::LayerNorm,
}

impl LayerNormLstm {
    /// Builds the cell under the given path.
    pub fn new(p: &nn::Path, in_dim: i64, units: i64) -> Self {
        let kernel = nn::linear(
            p / "kernel",
            in_dim + units,
            4 * units,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );
        let ln_gates = ["i", "j", "f", "o"]
            .iter()
            .map(|g| nn::layer_norm(p / format!("ln_{}", g), vec![units], Default::default()))
            .collect();
        let ln_state = nn::layer_norm(p / "ln_state", vec![units], Default::default());

        Self {
            in_dim,
            units,
            kernel,
            ln_gates,
            ln_state,
        }
    }

    /// Input dimension.
    pub fn in_dim(&self) -> i64 {
        self.in_dim
    }

    /// Number of units, the dimension of `c` and `h`.
    pub fn units(&self) -> i64 {
        self.units
    }

    /// One step given `x` of shape `[batch, in_dim]`.
    pub fn step(&self, x: &Tensor, state: &LstmState) -> LstmState {
        let gates = self.kernel.forward(&Tensor::cat(&[x, &state.h], 1));
        let gates = gates
            .chunk(4, 1)
            .iter()
            .zip(self.ln_gates.iter())
            .map(|(g, ln)| ln.forward(g))
            .collect::<Vec<_>>();
        let (i, j, f, o) = (&gates[0], &gates[1], &gates[2], &gates[3]);

        let c = &state.c * (f + FORGET_BIAS).sigmoid() + i.sigmoid() * j.tanh();
        let c = self.ln_state.forward(&c);
        let h = c.tanh() * o.sigmoid();
        LstmState { c, h }
    }

    /// Runs the cell over `xs` of shape `[steps, in_dim]`.
    ///
    /// Returns the outputs `[steps, units]` and the state after the last step.
    pub fn unroll(&self, xs: &Tensor, state: &LstmState) -> (Tensor, LstmState) {
        let n_steps = xs.size()[0];
        let mut state = state.clone();
        let mut outs = Vec::with_capacity(n_steps as usize);
        for t in 0..n_steps {
            state = self.step(&xs.narrow(0, t, 1), &state);
            outs.push(state.h.shallow_clone());
        }
        (Tensor::cat(&outs, 0), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unroll_matches_steps() {
        tch::manual_seed(0);
        let vs = nn::VarStore::new(Device::Cpu);
        let cell = LayerNormLstm::new(&(vs.root() / "lstm"), 5, 8);
        let xs = Tensor::randn(&[4, 5], (Kind::Float, Device::Cpu));
        let init = LstmState::zeros(8, Device::Cpu);

        let (outs, last) = cell.unroll(&xs, &init);
        assert_eq!(outs.size(), vec![4, 8]);

        // Unrolling in two halves with the carried state gives the same outputs
        let (outs1, mid) = cell.unroll(&xs.narrow(0, 0, 2), &init);
        let (outs2, last2) = cell.unroll(&xs.narrow(0, 2, 2), &mid);
        let outs_ = Tensor::cat(&[outs1, outs2], 0);
        assert!(outs.allclose(&outs_, 1e-5, 1e-6, false));
        assert!(last.c.allclose(&last2.c, 1e-5, 1e-6, false));

        // h is bounded by tanh
        assert!(outs.abs().max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn test_variables() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _ = LayerNormLstm::new(&(vs.root() / "lstm"), 3, 4);
        // kernel + 5 layer norms with weight and bias
        assert_eq!(vs.trainable_variables().len(), 1 + 5 * 2);
    }
}
