use super::{LayerNormLstm, LstmState};
use tch::{nn, Device, Tensor};

/// Passes `t` with gradient if `backprop`, without gradient otherwise.
///
/// The value is `t` in both cases.
pub fn conditional_backprop(backprop: bool, t: &Tensor) -> Tensor {
    if backprop {
        t.shallow_clone()
    } else {
        t.detach()
    }
}

/// State of a [`DilatedLstm`].
pub struct DilatedLstmState {
    pub lstm: LstmState,

    /// Chunk of the cell state receiving gradient at the next step.
    pub index: i64,
}

impl DilatedLstmState {
    /// Zero state starting at chunk 0.
    pub fn zeros(units: i64, device: Device) -> Self {
        Self {
            lstm: LstmState::zeros(units, device),
            index: 0,
        }
    }

    /// Cuts the state from the computation graph.
    pub fn detach(&self) -> Self {
        Self {
            lstm: self.lstm.detach(),
            index: self.index,
        }
    }
}

impl Clone for DilatedLstmState {
    fn clone(&self) -> Self {
        Self {
            lstm: self.lstm.clone(),
            index: self.index,
        }
    }
}

/// Dilated LSTM.
///
/// The cell state of `units` dimensions is split into `chunks` slices. After
/// each step, only the slice at the current index keeps its gradient path to
/// the next step and the index advances modulo `chunks`. Each slice thus
/// integrates over `chunks` steps, which slows down the effective time scale
/// of the cell without changing its forward values.
pub struct DilatedLstm {
    cell: LayerNormLstm,
    chunks: i64,
}

impl DilatedLstm {
    /// Builds the cell. `units` must be a multiple of `chunks`.
    pub fn new(p: &nn::Path, in_dim: i64, units: i64, chunks: i64) -> Self {
        debug_assert_eq!(units % chunks, 0);
        Self {
            cell: LayerNormLstm::new(p, in_dim, units),
            chunks,
        }
    }

    /// Number of chunks.
    pub fn chunks(&self) -> i64 {
        self.chunks
    }

    /// Number of units.
    pub fn units(&self) -> i64 {
        self.cell.units()
    }

    fn dilate(&self, c: &Tensor, index: i64) -> Tensor {
        let size = self.cell.units() / self.chunks;
        let slices = (0..self.chunks)
            .map(|j| conditional_backprop(j == index, &c.narrow(1, j * size, size)))
            .collect::<Vec<_>>();
        Tensor::cat(&slices, 1)
    }

    /// One step given `x` of shape `[1, in_dim]`. Returns the output `h` and the next state.
    pub fn step(&self, x: &Tensor, state: &DilatedLstmState) -> (Tensor, DilatedLstmState) {
        let next = self.cell.step(x, &state.lstm);
        let c = self.dilate(&next.c, state.index);
        let h = next.h;
        let state = DilatedLstmState {
            lstm: LstmState {
                c,
                h: h.shallow_clone(),
            },
            index: (state.index + 1) % self.chunks,
        };
        (h, state)
    }

    /// Runs the cell over `xs` of shape `[steps, in_dim]`.
    pub fn unroll(&self, xs: &Tensor, state: &DilatedLstmState) -> (Tensor, DilatedLstmState) {
        let n_steps = xs.size()[0];
        let mut state = state.clone();
        let mut outs = Vec::with_capacity(n_steps as usize);
        for t in 0..n_steps {
            let (h, next) = self.step(&xs.narrow(0, t, 1), &state);
            outs.push(h);
            state = next;
        }
        (Tensor::cat(&outs, 0), state)
    }
}
