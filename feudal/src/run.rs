use anyhow::Result;
use feudal_core::{
    record::{Record, RecordValue, Recorder},
    Rollout, Transition,
};
use feudal_tch_agent::{
    fun::{Fun, FunBatch, FunConfig},
    gac::{Gac, GacConfig},
    util::{sample_categorical, tensor_to_vec},
};
use feudal_tensorboard::TensorboardRecorder;
use log::info;
use std::{fs, path::PathBuf};
use tch::{Device, Kind, Tensor};

const FUN_CONFIG: &str = "fun.yaml";
const GAC_CONFIG: &str = "gac.yaml";
const DISCOUNT_FACTOR: f32 = 0.99;
const REWARD_PROB: f32 = 0.1;
const SUMMARY_INTERVAL: usize = 10;

/// Options shared by the runs of both networks.
pub struct RunOptions {
    pub model_dir: PathBuf,
    pub resume: bool,
    pub steps: usize,
    pub rollout_len: usize,
    pub nb_actions: Option<i64>,
    pub lr: Option<f64>,
    pub device: Option<Device>,
}

pub fn create_fun_config(opts: &RunOptions) -> Result<()> {
    fs::create_dir_all(&opts.model_dir)?;
    FunConfig::default().save(opts.model_dir.join(FUN_CONFIG))
}

pub fn create_gac_config(opts: &RunOptions) -> Result<()> {
    fs::create_dir_all(&opts.model_dir)?;
    GacConfig::default().save(opts.model_dir.join(GAC_CONFIG))
}

fn fun_config(opts: &RunOptions) -> Result<FunConfig> {
    let path = opts.model_dir.join(FUN_CONFIG);
    let mut config = if path.exists() {
        FunConfig::load(&path)?
    } else {
        info!("{:?} not found, use the default configuration", path);
        FunConfig::default()
    };
    if let Some(n) = opts.nb_actions {
        config = config.nb_actions(n);
    }
    if let Some(lr) = opts.lr {
        let opt_config = config.opt_config.clone().learning_rate(lr);
        config = config.opt_config(opt_config);
    }
    if let Some(device) = opts.device {
        config = config.device(device);
    }
    Ok(config)
}

fn gac_config(opts: &RunOptions) -> Result<GacConfig> {
    let path = opts.model_dir.join(GAC_CONFIG);
    let mut config = if path.exists() {
        GacConfig::load(&path)?
    } else {
        info!("{:?} not found, use the default configuration", path);
        GacConfig::default()
    };
    if let Some(n) = opts.nb_actions {
        config = config.nb_actions(n);
    }
    if let Some(lr) = opts.lr {
        config = config.lr(lr);
    }
    if let Some(device) = opts.device {
        config = config.device(device);
    }
    Ok(config
        .checkpoint_dir(opts.model_dir.join("checkpoints"))
        .resume(opts.resume))
}

fn random_obs(channels: i64, height: i64, width: i64) -> Tensor {
    Tensor::rand(&[1, channels, height, width], (Kind::Float, Device::Cpu))
}

fn random_reward() -> f32 {
    if fastrand::f32() < REWARD_PROB {
        1.0
    } else {
        0.0
    }
}

/// Trains the FeUdal network on rollouts of random observations and rewards.
pub fn run_fun(opts: &RunOptions) -> Result<()> {
    let config = fun_config(opts)?;
    let (channels, size, n_actions) = (config.game_channels, config.game_size, config.nb_actions);
    let params_dir = opts.model_dir.join("params");
    let mut agent = Fun::build(config)?;
    if opts.resume {
        agent.load(&params_dir)?;
    }
    agent.train();
    let mut recorder = TensorboardRecorder::new(opts.model_dir.join("summaries"));

    let mut state = agent.initial_state();
    let mut obs = random_obs(channels, size, size);
    for step in 0..opts.steps {
        let start_state = state.detach();
        let mut rollout = Rollout::new();
        for _ in 0..opts.rollout_len {
            let (act, out) = agent.sample(&obs, &state)?;
            let next_obs = random_obs(channels, size, size);
            rollout.push(Transition {
                obs,
                act,
                pi: tensor_to_vec(&out.policy)?,
                reward: random_reward(),
                next_obs: next_obs.shallow_clone(),
                value: out.w_value.double_value(&[0]) as f32,
                discounted_return: 0.0,
            });
            state = out.state;
            obs = next_obs;
        }
        let (_, out) = agent.sample(&obs, &state)?;
        rollout.compute_returns(DISCOUNT_FACTOR, out.w_value.double_value(&[0]) as f32);

        let batch = FunBatch::from_rollout(&rollout, n_actions, start_state)?;
        let mut record = agent.opt(&batch)?;
        agent.decay_random_goal_prob();
        if step % SUMMARY_INTERVAL == 0 || step + 1 == opts.steps {
            record.merge_inplace(agent.summaries(&batch)?);
        }
        info!(
            "FUN opt {}: loss {}",
            agent.n_opts(),
            record.get_scalar("loss")?
        );
        record.insert("opt_steps", RecordValue::Scalar(agent.n_opts() as f32));
        recorder.write(record);
        state = state.detach();
    }

    agent.save(&params_dir)
}

/// Trains the actor-critic network on rollouts of random observations and rewards.
pub fn run_gac(opts: &RunOptions) -> Result<()> {
    let config = gac_config(opts)?;
    let (channels, height, width) = (
        config.agent_history_length,
        config.resized_height,
        config.resized_width,
    );
    let mut gac = Gac::build(config)?;
    let mut recorder = TensorboardRecorder::new(opts.model_dir.join("summaries"));

    for _ in 0..opts.steps {
        let mut rollout = Rollout::new();
        let mut obs = random_obs(channels, height, width);
        for _ in 0..opts.rollout_len {
            let (pi, v) = gac.predict(&obs);
            let pi = tensor_to_vec(&pi)?;
            let next_obs = random_obs(channels, height, width);
            rollout.push(Transition {
                obs,
                act: sample_categorical(&pi, fastrand::f32()),
                pi,
                reward: random_reward(),
                next_obs: next_obs.shallow_clone(),
                value: v.double_value(&[0]) as f32,
                discounted_return: 0.0,
            });
            obs = next_obs;
        }
        let (_, v) = gac.predict(&obs);
        rollout.compute_returns(DISCOUNT_FACTOR, v.double_value(&[0]) as f32);

        let record: Record = gac.train(&rollout, 0)?;
        gac.increment_global_step();
        info!(
            "GAC step {}: loss {}",
            gac.global_step(),
            record.get_scalar("loss")?
        );
        gac.log(&rollout, &mut recorder)?;
    }

    gac.save_checkpoint()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn opts(dir: &TempDir, resume: bool) -> RunOptions {
        RunOptions {
            model_dir: dir.path().to_path_buf(),
            resume,
            steps: 2,
            rollout_len: 4,
            nb_actions: Some(3),
            lr: Some(1e-3),
            device: Some(Device::Cpu),
        }
    }

    #[test]
    fn test_random_reward() {
        fastrand::seed(7);
        let rewards = (0..1000).map(|_| random_reward()).collect::<Vec<_>>();
        assert!(rewards.iter().all(|&r| r == 0.0 || r == 1.0));
        let n_rewarded = rewards.iter().filter(|&&r| r == 1.0).count();
        assert!((50..150).contains(&n_rewarded));
    }

    #[test]
    fn test_run_fun() -> Result<()> {
        let tmp = TempDir::new("run_fun")?;
        create_fun_config(&opts(&tmp, false))?;
        assert!(tmp.path().join(FUN_CONFIG).exists());

        run_fun(&opts(&tmp, false))?;
        assert!(tmp.path().join("params").join("fun.pt").exists());
        run_fun(&opts(&tmp, true))?;
        Ok(())
    }

    #[test]
    fn test_run_gac() -> Result<()> {
        let tmp = TempDir::new("run_gac")?;
        create_gac_config(&opts(&tmp, false))?;
        let mut o = opts(&tmp, false);
        o.steps = 1;

        run_gac(&o)?;
        let checkpoints = tmp.path().join("checkpoints");
        assert!(checkpoints.join("1").join("gac.pt").exists());

        o.resume = true;
        run_gac(&o)?;
        assert!(checkpoints.join("2").join("gac.pt").exists());
        Ok(())
    }
}
