use super::{Activation, ConvEncoderConfig};
use crate::model::SubModel;
use tch::{nn, nn::Module, Device, Tensor};

/// Stack of convolution layers followed by a fully connected layer.
pub struct ConvEncoder {
    device: Device,
    activation: Activation,
    out_activation: Activation,
    convs: Vec<nn::Conv2D>,
    linear: nn::Linear,
}

impl ConvEncoder {
    /// Weights `[out, in, kh, kw]` of the first convolution layer.
    pub fn first_kernels(&self) -> Option<&Tensor> {
        self.convs.first().map(|c| &c.ws)
    }

    /// Outputs of the convolution stack, before flattening.
    pub fn features(&self, xs: &Tensor) -> Tensor {
        self.convs
            .iter()
            .fold(xs.to(self.device), |xs, conv| {
                self.activation.apply(&conv.forward(&xs))
            })
    }

    /// Activations of each convolution layer.
    pub fn feature_maps(&self, xs: &Tensor) -> Vec<Tensor> {
        let mut maps: Vec<Tensor> = Vec::with_capacity(self.convs.len());
        for conv in self.convs.iter() {
            let xs = match maps.last() {
                Some(xs) => conv.forward(xs),
                None => conv.forward(&xs.to(self.device)),
            };
            maps.push(self.activation.apply(&xs));
        }
        maps
    }

    /// Output layer applied to the outputs of the convolution stack.
    pub fn head(&self, features: &Tensor) -> Tensor {
        self.out_activation
            .apply(&self.linear.forward(&features.flatten(1, -1)))
    }
}

impl SubModel for ConvEncoder {
    type Config = ConvEncoderConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn build(p: &nn::Path, config: Self::Config) -> Self {
        let mut in_channels = config.in_channels;
        let convs = config
            .layers
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let conv_config = nn::ConvConfig {
                    stride: l.stride,
                    padding: l.pad(),
                    ..Default::default()
                };
                let conv = nn::conv2d(
                    p / format!("conv{}", i + 1),
                    in_channels,
                    l.out_channels,
                    l.kernel,
                    conv_config,
                );
                in_channels = l.out_channels;
                conv
            })
            .collect();
        let linear = nn::linear(p / "fc", config.flat_dim(), config.out_dim, Default::default());

        Self {
            device: p.device(),
            activation: config.activation,
            out_activation: config.out_activation,
            convs,
            linear,
        }
    }

    fn forward(&self, xs: &Self::Input) -> Tensor {
        self.head(&self.features(xs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnn::{ConvLayerConfig, Padding};
    use tch::Kind;

    #[test]
    fn test_forward_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ConvEncoderConfig::new(3, 13, 13, 48)
            .layer(ConvLayerConfig::new(32, 5, 2, Padding::Same))
            .activation(Activation::Elu)
            .out_activation(Activation::Elu);
        let enc = ConvEncoder::build(&(vs.root() / "perception"), config);

        let xs = Tensor::rand(&[6, 3, 13, 13], (Kind::Float, Device::Cpu));
        assert_eq!(enc.features(&xs).size(), vec![6, 32, 7, 7]);
        let maps = enc.feature_maps(&xs);
        assert_eq!(maps.len(), 1);
        assert!(maps[0].allclose(&enc.features(&xs), 1e-6, 1e-6, false));
        assert_eq!(enc.forward(&xs).size(), vec![6, 48]);
        assert_eq!(enc.first_kernels().unwrap().size(), vec![32, 3, 5, 5]);
    }
}
