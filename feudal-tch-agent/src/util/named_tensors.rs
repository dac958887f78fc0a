use std::collections::HashMap;
use tch::{nn::VarStore, Device::Cpu, Tensor};

/// Named tensors to send model parameters between a learner and its local copies.
pub struct NamedTensors {
    pub named_tensors: HashMap<String, Tensor>,
}

impl NamedTensors {
    /// Copy data of VarStore to CPU.
    pub fn copy_from(vs: &VarStore) -> Self {
        let src = vs.variables();

        tch::no_grad(|| NamedTensors {
            named_tensors: src
                .iter()
                .map(|(k, v)| (k.clone(), v.detach().to(Cpu).data()))
                .collect(),
        })
    }

    /// Copy named tensors to [VarStore].
    ///
    /// Variables missing in either side are skipped.
    pub fn copy_to(&self, vs: &mut VarStore) {
        let dest = &mut vs.variables();

        tch::no_grad(|| {
            for (name, src) in self.named_tensors.iter() {
                if let Some(dest) = dest.get_mut(name) {
                    dest.copy_(src);
                }
            }
        });
    }
}

impl Clone for NamedTensors {
    fn clone(&self) -> Self {
        tch::no_grad(|| NamedTensors {
            named_tensors: self
                .named_tensors
                .iter()
                .map(|(k, v)| (k.clone(), v.detach().to(Cpu).copy()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn;

    #[test]
    fn test_copy_between_var_stores() {
        let src = VarStore::new(Cpu);
        let _ = src.root().var("w", &[2, 2], nn::Init::Const(3.0));
        let mut dest = VarStore::new(Cpu);
        let w = dest.root().var("w", &[2, 2], nn::Init::Const(0.0));

        let snapshot = NamedTensors::copy_from(&src).clone();
        snapshot.copy_to(&mut dest);
        assert_eq!(w.sum(tch::Kind::Float).double_value(&[]), 12.0);
    }
}
