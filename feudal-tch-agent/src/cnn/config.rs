use serde::{Deserialize, Serialize};
use tch::Tensor;

/// Padding of a convolution layer.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub enum Padding {
    /// The output size is `ceil(n / stride)`.
    Same,

    /// No padding, the output size is `floor((n - kernel) / stride) + 1`.
    Valid,
}

/// Activation function.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub enum Activation {
    Relu,
    Elu,
    Identity,
}

impl Activation {
    /// Applies the activation.
    pub fn apply(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Relu => xs.relu(),
            Self::Elu => xs.elu(),
            Self::Identity => xs.shallow_clone(),
        }
    }
}

/// Configuration of a convolution layer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConvLayerConfig {
    pub out_channels: i64,
    pub kernel: i64,
    pub stride: i64,
    pub padding: Padding,
}

impl ConvLayerConfig {
    /// Constructs a layer configuration.
    pub fn new(out_channels: i64, kernel: i64, stride: i64, padding: Padding) -> Self {
        Self {
            out_channels,
            kernel,
            stride,
            padding,
        }
    }

    /// Spatial size of the output given the input size `n`.
    pub fn out_size(&self, n: i64) -> i64 {
        match self.padding {
            Padding::Same => (n + self.stride - 1) / self.stride,
            Padding::Valid if n < self.kernel => 0,
            Padding::Valid => (n - self.kernel) / self.stride + 1,
        }
    }

    /// Zero padding on each side.
    ///
    /// For odd kernels `kernel / 2` gives the same output size as
    /// [`Padding::Same`].
    pub fn pad(&self) -> i64 {
        match self.padding {
            Padding::Same => self.kernel / 2,
            Padding::Valid => 0,
        }
    }
}

/// Configuration of [`ConvEncoder`](super::ConvEncoder).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConvEncoderConfig {
    pub in_channels: i64,
    pub in_height: i64,
    pub in_width: i64,
    pub layers: Vec<ConvLayerConfig>,
    pub activation: Activation,
    pub out_dim: i64,
    pub out_activation: Activation,
}

impl ConvEncoderConfig {
    /// Constructs a configuration without convolution layers.
    pub fn new(in_channels: i64, in_height: i64, in_width: i64, out_dim: i64) -> Self {
        Self {
            in_channels,
            in_height,
            in_width,
            layers: vec![],
            activation: Activation::Relu,
            out_dim,
            out_activation: Activation::Relu,
        }
    }

    /// Appends a convolution layer.
    pub fn layer(mut self, layer: ConvLayerConfig) -> Self {
        self.layers.push(layer);
        self
    }

    /// Sets the activation after each convolution layer.
    pub fn activation(mut self, v: Activation) -> Self {
        self.activation = v;
        self
    }

    /// Sets the activation of the output layer.
    pub fn out_activation(mut self, v: Activation) -> Self {
        self.out_activation = v;
        self
    }

    /// Shape `[channels, height, width]` of the output of the last convolution.
    pub fn conv_out_shape(&self) -> [i64; 3] {
        self.layers.iter().fold(
            [self.in_channels, self.in_height, self.in_width],
            |[_, h, w], l| [l.out_channels, l.out_size(h), l.out_size(w)],
        )
    }

    /// Number of features fed to the output layer.
    pub fn flat_dim(&self) -> i64 {
        self.conv_out_shape().iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_size() {
        let same = ConvLayerConfig::new(32, 5, 2, Padding::Same);
        let valid = ConvLayerConfig::new(32, 5, 2, Padding::Valid);
        assert_eq!(same.out_size(84), 42);
        assert_eq!(same.out_size(13), 7);
        assert_eq!(valid.out_size(42), 19);
        assert_eq!(valid.out_size(13), 5);

        // Symmetric padding reproduces the output size of "same" padding
        for n in 5..40 {
            assert_eq!((n + 2 * same.pad() - 5) / 2 + 1, same.out_size(n));
        }
    }

    #[test]
    fn test_flat_dim() {
        let config = ConvEncoderConfig::new(4, 84, 84, 32)
            .layer(ConvLayerConfig::new(16, 5, 2, Padding::Same))
            .layer(ConvLayerConfig::new(32, 5, 2, Padding::Valid));
        assert_eq!(config.conv_out_shape(), [32, 19, 19]);
        assert_eq!(config.flat_dim(), 32 * 19 * 19);
    }
}
