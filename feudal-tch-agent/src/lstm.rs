//! Recurrent cells.
//!
//! [`LayerNormLstm`] is an LSTM cell with layer normalization of the gates and
//! of the cell state. [`DilatedLstm`] runs such a cell with its cell state split
//! into chunks, only one of which receives gradient at each step.
mod dilated;
mod layer_norm;
pub use dilated::{conditional_backprop, DilatedLstm, DilatedLstmState};
pub use layer_norm::{LayerNormLstm, LstmState};
