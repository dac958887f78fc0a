use anyhow::Result;
use feudal_core::SyncModel;
use feudal_tch_agent::{
    fun::{Fun, FunBatch, FunConfig},
    model::ModelBase,
    opt::OptimizerConfig,
};
use std::convert::TryFrom;
use tch::{Device, Kind, Tensor};
use tempdir::TempDir;

const GAME_SIZE: i64 = 9;
const N_ACTIONS: i64 = 3;
const N_STEPS: i64 = 6;

fn config() -> FunConfig {
    FunConfig::default()
        .game(GAME_SIZE, 3)
        .nb_actions(N_ACTIONS)
        .manager(16, 4)
        .goal_embedding_size(4)
        .random_goal_prob(0.5, 0.1, 4)
        .opt_config(OptimizerConfig::Adam { lr: 1e-3 })
        .device(Device::Cpu)
}

fn obs(n: i64) -> Tensor {
    Tensor::rand(&[n, 3, GAME_SIZE, GAME_SIZE], (Kind::Float, Device::Cpu))
}

fn batch(agent: &Fun) -> Result<FunBatch> {
    let actions = (0..N_STEPS).map(|t| t % N_ACTIONS).collect::<Vec<_>>();
    let w_returns = (0..N_STEPS).map(|t| 0.1 * t as f32).collect::<Vec<_>>();
    let m_returns = vec![1f32; N_STEPS as usize];
    FunBatch::new(
        obs(N_STEPS),
        &actions,
        &w_returns,
        &m_returns,
        agent.initial_state(),
    )
}

fn to_vec(t: &Tensor) -> Vec<f32> {
    Vec::<f32>::try_from(&t.flatten(0, -1).to_kind(Kind::Float)).unwrap()
}

fn squared_norms(goals: &Tensor) -> Vec<f32> {
    to_vec(
        &goals
            .square()
            .sum_dim_intlist(Some([1].as_slice()), false, Kind::Float),
    )
}

#[test]
fn test_forward_shapes_and_invariants() -> Result<()> {
    tch::manual_seed(42);
    let agent = Fun::build(config())?;
    let out = agent
        .model()
        .forward(&obs(N_STEPS), &agent.initial_state(), false);

    assert_eq!(out.percept.size(), vec![N_STEPS, 48]);
    assert_eq!(out.goals.size(), vec![N_STEPS, 16]);
    assert_eq!(out.policy.size(), vec![N_STEPS, N_ACTIONS]);
    assert_eq!(out.m_value.size(), vec![N_STEPS]);
    assert_eq!(out.w_value.size(), vec![N_STEPS]);
    assert_eq!(out.intrinsic_rewards.size(), vec![N_STEPS]);

    // Goals are unit vectors and policies are distributions
    let norms = squared_norms(&out.goals);
    assert!(norms.iter().all(|n| (n - 1.0).abs() < 1e-4));
    let sums = to_vec(&out.policy.sum_dim_intlist(Some([1].as_slice()), false, Kind::Float));
    assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));

    // Intrinsic rewards are averaged cosines
    let rewards = to_vec(&out.intrinsic_rewards);
    assert_eq!(rewards[0], 0.0);
    assert!(rewards.iter().all(|r| r.abs() <= 1.0 + 1e-5));

    // The sum of goals at step t covers steps max(t - c, 0)..=t
    let goals = to_vec(&out.goals);
    let sum_prev_goals = to_vec(&out.sum_prev_goals);
    let (d, c) = (16usize, 4usize);
    for t in 0..N_STEPS as usize {
        for j in 0..d {
            let expected: f32 = (t.saturating_sub(c)..=t).map(|u| goals[u * d + j]).sum();
            assert!((sum_prev_goals[t * d + j] - expected).abs() < 1e-4);
        }
    }

    // The history keeps the manager's horizon
    assert_eq!(out.state.history.len(), 4);
    assert_eq!(out.state.manager.index, N_STEPS % 4);
    Ok(())
}

#[test]
fn test_carried_state_matches_full_rollout() -> Result<()> {
    tch::manual_seed(42);
    let agent = Fun::build(config())?;
    let model = agent.model();
    let xs = obs(N_STEPS);
    let full = model.forward(&xs, &agent.initial_state(), false);

    let first = model.forward(&xs.narrow(0, 0, 2), &agent.initial_state(), false);
    let second = model.forward(&xs.narrow(0, 2, N_STEPS - 2), &first.state, false);

    let policy = Tensor::cat(&[&first.policy, &second.policy], 0);
    assert!(policy.allclose(&full.policy, 1e-5, 1e-5, false));
    let sums = Tensor::cat(&[&first.sum_prev_goals, &second.sum_prev_goals], 0);
    assert!(sums.allclose(&full.sum_prev_goals, 1e-5, 1e-5, false));
    let rewards = Tensor::cat(&[&first.intrinsic_rewards, &second.intrinsic_rewards], 0);
    assert!(rewards.allclose(&full.intrinsic_rewards, 1e-5, 1e-5, false));
    Ok(())
}

#[test]
fn test_randomized_goals_do_not_change_rewards() -> Result<()> {
    tch::manual_seed(42);
    let mut agent = Fun::build(config().random_goal_prob(1.0, 1.0, 4))?;
    let c = 4;
    let xs = obs(N_STEPS);
    let initial = agent.initial_state();
    let full = agent.model().forward(&xs, &initial, false);

    // Act one step at a time with every goal replaced
    let mut state = agent.initial_state();
    let mut rewards = vec![];
    for t in 0..c {
        let (_, out) = agent.sample(&xs.narrow(0, t, 1), &state)?;
        rewards.push(out.intrinsic_rewards);
        state = out.state;
    }
    let head = Tensor::cat(&rewards, 0);
    assert!(head.allclose(&full.intrinsic_rewards.narrow(0, 0, c), 1e-5, 1e-5, false));

    // Continuing from the sampled state sees only the manager's goals
    let rest = agent
        .model()
        .forward(&xs.narrow(0, c, N_STEPS - c), &state, false);
    let tail = |t: &Tensor| t.narrow(0, c, N_STEPS - c);
    assert!(rest
        .intrinsic_rewards
        .allclose(&tail(&full.intrinsic_rewards), 1e-5, 1e-5, false));
    assert!(rest
        .sum_prev_goals
        .allclose(&tail(&full.sum_prev_goals), 1e-5, 1e-5, false));
    assert!(rest.policy.allclose(&tail(&full.policy), 1e-5, 1e-5, false));
    Ok(())
}

#[test]
fn test_goal_exploration() -> Result<()> {
    tch::manual_seed(42);
    let xs = obs(N_STEPS);

    // Every goal is replaced while training
    let mut agent = Fun::build(config().random_goal_prob(1.0, 1.0, 4))?;
    let state = agent.initial_state();
    let own = agent.model().forward(&xs, &state, false).goals;
    let (_, out) = agent.sample(&xs, &state)?;
    assert!(!out.goals.allclose(&own, 1e-3, 1e-3, false));
    assert!(squared_norms(&out.goals)
        .iter()
        .all(|n| (n - 1.0).abs() > 1e-3));
    let kept = Tensor::cat(&out.state.history.goals, 0);
    assert!(kept.allclose(&own.narrow(0, N_STEPS - 4, 4), 1e-5, 1e-5, false));

    // Never in evaluation mode
    agent.eval();
    let (_, out) = agent.sample(&xs, &state)?;
    assert!(out.goals.allclose(&own, 1e-5, 1e-5, false));
    assert!(squared_norms(&out.goals)
        .iter()
        .all(|n| (n - 1.0).abs() < 1e-4));

    // Nor with a zero probability
    let mut agent = Fun::build(config().random_goal_prob(0.0, 0.0, 1))?;
    let own = agent.model().forward(&xs, &state, false).goals;
    let (_, out) = agent.sample(&xs, &state)?;
    assert!(out.goals.allclose(&own, 1e-5, 1e-5, false));
    Ok(())
}

#[test]
fn test_sample() -> Result<()> {
    tch::manual_seed(42);
    let mut agent = Fun::build(config())?;
    let mut state = agent.initial_state();
    for _ in 0..3 {
        let (act, out) = agent.sample(&obs(1), &state)?;
        assert!((0..N_ACTIONS).contains(&act));
        state = out.state;
    }
    assert_eq!(state.history.len(), 3);

    agent.eval();
    let (act, out) = agent.sample(&obs(1), &state)?;
    let probs = to_vec(&out.policy);
    let best = probs
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |a, (i, &p)| if p > a.1 { (i, p) } else { a })
        .0;
    assert_eq!(act, best as i64);
    Ok(())
}

#[test]
fn test_opt_changes_parameters() -> Result<()> {
    tch::manual_seed(42);
    let mut agent = Fun::build(config())?;
    let batch = batch(&agent)?;
    let before = agent.model().get_var_store().trainable_variables()[0].copy();

    let record = agent.opt(&batch)?;
    for key in [
        "loss",
        "w_value_loss",
        "w_policy_loss",
        "m_value_loss",
        "goals_loss",
        "entropy",
        "grad_norm",
        "var_norm",
    ] {
        assert!(record.get_scalar(key)?.is_finite(), "{}", key);
    }
    assert_eq!(record.get_scalar("prob_of_random_goal")?, 0.5);
    assert_eq!(agent.n_opts(), 1);

    let after = &agent.model().get_var_store().trainable_variables()[0];
    assert!(!before.allclose(after, 1e-12, 1e-12, false));
    Ok(())
}

#[test]
fn test_summaries() -> Result<()> {
    tch::manual_seed(42);
    let mut agent = Fun::build(config())?;
    let batch = batch(&agent)?;
    let record = agent.summaries(&batch)?;

    assert!(record.get_array1("percept")?.len() == (N_STEPS * 48) as usize);
    assert!(record.get_scalar("worker/policy/sparsity")? >= 0.0);
    let (_, shape) = record.get_array3("images/kernels")?;
    assert_eq!(shape[0], 3);
    let (_, shape) = record.get_array3("images/input")?;
    assert_eq!(shape, [3, GAME_SIZE as usize, GAME_SIZE as usize]);
    assert!(record.keys().any(|k| k.starts_with("grads/")));
    assert!(record.keys().any(|k| k.starts_with("weights/")));
    Ok(())
}

#[test]
fn test_decay_random_goal_prob() -> Result<()> {
    let mut agent = Fun::build(config())?;
    assert_eq!(agent.prob_of_random_goal(), 0.5);
    for _ in 0..2 {
        agent.decay_random_goal_prob();
    }
    assert!((agent.prob_of_random_goal() - 0.3).abs() < 1e-6);
    for _ in 0..10 {
        agent.decay_random_goal_prob();
    }
    assert!((agent.prob_of_random_goal() - 0.1).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_save_load_and_sync() -> Result<()> {
    tch::manual_seed(42);
    let tmp = TempDir::new("fun")?;
    let mut learner = Fun::build(config())?;
    let batch = batch(&learner)?;
    learner.opt(&batch)?;
    learner.decay_random_goal_prob();
    learner.save(tmp.path())?;
    assert!(tmp.path().join("fun.pt").exists());

    let xs = obs(2);
    let expected = learner
        .model()
        .forward(&xs, &learner.initial_state(), false)
        .policy;

    let mut restored = Fun::build(config())?;
    restored.load(tmp.path())?;
    assert_eq!(restored.prob_of_random_goal(), learner.prob_of_random_goal());
    let policy = restored
        .model()
        .forward(&xs, &restored.initial_state(), false)
        .policy;
    assert!(policy.allclose(&expected, 1e-6, 1e-6, false));

    let mut worker = Fun::build(config())?;
    let (n_opts, info) = learner.model_info();
    assert_eq!(n_opts, 1);
    worker.sync_model(&info);
    let policy = worker
        .model()
        .forward(&xs, &worker.initial_state(), false)
        .policy;
    assert!(policy.allclose(&expected, 1e-6, 1e-6, false));
    Ok(())
}

#[test]
fn test_invalid_config() {
    assert!(Fun::build(config().manager(15, 4)).is_err());
}
