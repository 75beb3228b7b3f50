use std::path::PathBuf;

use burn::tensor::backend::AutodiffBackend;

use crate::checkpoint::{CheckpointManager, Extra};
use crate::config::AppConfig;
use crate::error::CheckpointError;
use crate::optim::SplatAdam;
use crate::rng::RngContext;
use crate::scene::GaussianModel;

/// Live training state: the pieces a checkpoint captures plus the schedule
/// that drives them.
pub struct TrainingSession<B: AutodiffBackend> {
    pub model: GaussianModel<B>,
    pub optimizer: SplatAdam<B>,
    pub step: u64,
    pub rng: RngContext,
    /// Auxiliary values saved with every checkpoint.
    pub extra: Extra,
    sh_increase_interval: u64,
}

impl<B: AutodiffBackend> TrainingSession<B> {
    /// New session seeded from `config.training`.
    pub fn fresh(config: &AppConfig, device: &B::Device) -> Self {
        let training = &config.training;
        let mut rng = RngContext::seeded(training.seed, training.num_devices);
        let model = config.model.init(training.num_points, &mut rng, device);
        let optimizer = config.optimizer.init(&model);

        TrainingSession {
            model,
            optimizer,
            step: 0,
            rng,
            extra: Extra::new(),
            sh_increase_interval: training.sh_increase_interval,
        }
    }

    /// Resume from the newest checkpoint managed by `manager`, or start
    /// fresh when the directory holds none.
    pub fn resume_or_fresh(
        config: &AppConfig,
        manager: &CheckpointManager,
        device: &B::Device,
    ) -> Result<Self, CheckpointError> {
        let training = &config.training;
        let mut rng = RngContext::seeded(training.seed, training.num_devices);
        let optimizer_config = &config.optimizer;

        let loaded = manager.load_latest(
            GaussianModel::<B>::from_state,
            |model: &GaussianModel<B>| optimizer_config.init(model),
            &mut rng,
            device,
        )?;

        match loaded {
            Some(loaded) => {
                tracing::info!("Resumed from step {}", loaded.step);
                Ok(TrainingSession {
                    model: loaded.model,
                    optimizer: loaded.optimizer,
                    step: loaded.step,
                    rng,
                    extra: loaded.record.extra.unwrap_or_default(),
                    sh_increase_interval: training.sh_increase_interval,
                })
            }
            None => {
                tracing::info!("No checkpoint found, starting fresh");
                Ok(Self::fresh(config, device))
            }
        }
    }

    /// One optimizer step. Every `sh_increase_interval` steps the next SH
    /// band is enabled until the model reaches its maximum degree.
    pub fn apply_gradients(&mut self, grads: &B::Gradients) {
        self.model = self.optimizer.step(self.model.clone(), grads);
        self.step += 1;

        if self.sh_increase_interval > 0
            && self.step % self.sh_increase_interval == 0
            && self.model.oneup_sh_degree()
        {
            tracing::debug!(
                step = self.step,
                "SH degree raised to {}",
                self.model.active_sh_degree()
            );
        }
    }

    pub fn should_checkpoint(&self, manager: &CheckpointManager) -> bool {
        manager.is_due(self.step)
    }

    /// Save the current state through `manager` and return the file written.
    pub fn checkpoint(&self, manager: &CheckpointManager) -> Result<PathBuf, CheckpointError> {
        let extra = (!self.extra.is_empty()).then(|| self.extra.clone());
        manager.save(&self.model, &self.optimizer, self.step, &self.rng, extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Tensor;
    use rand::Rng;

    use crate::checkpoint::CheckpointManagerConfig;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn test_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.training.num_points = 8;
        config.training.seed = 11;
        config.training.num_devices = 2;
        config.training.sh_increase_interval = 2;
        config.checkpoint = CheckpointManagerConfig {
            checkpoint_dir: dir.to_path_buf(),
            interval: 3,
            keep_last_n: 0,
            strict_optimizer: true,
        };
        config
    }

    fn train_step(session: &mut TrainingSession<TestBackend>) {
        let model = &session.model;
        let loss: Tensor<TestBackend, 1> = model.means.val().sum()
            + model.features_dc.val().sum()
            + model.features_rest.val().sum()
            + model.scales.val().sum()
            + model.rotations.val().sum()
            + model.opacities.val().sum();
        let grads = loss.backward();
        session.apply_gradients(&grads);
    }

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_fresh_is_deterministic_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let device = Default::default();

        let a = TrainingSession::<TestBackend>::fresh(&config, &device);
        let b = TrainingSession::<TestBackend>::fresh(&config, &device);
        assert_eq!(a.step, 0);
        assert_eq!(a.model.num_points(), 8);
        assert_eq!(a.rng.num_devices(), 2);
        assert_eq!(values(a.model.means.val()), values(b.model.means.val()));
    }

    #[test]
    fn test_apply_gradients_advances_step_and_sh_degree() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut session = TrainingSession::<TestBackend>::fresh(&config, &Default::default());
        let before = values(session.model.means.val());

        train_step(&mut session);
        assert_eq!(session.step, 1);
        assert_eq!(session.model.active_sh_degree(), 0);
        assert_ne!(values(session.model.means.val()), before);
        assert!(!session.optimizer.is_empty());

        train_step(&mut session);
        assert_eq!(session.model.active_sh_degree(), 1);

        for _ in 0..6 {
            train_step(&mut session);
        }
        assert_eq!(session.step, 8);
        assert_eq!(session.model.active_sh_degree(), 3);
    }

    #[test]
    fn test_resume_without_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = CheckpointManager::new(config.checkpoint.clone());

        let session =
            TrainingSession::<TestBackend>::resume_or_fresh(&config, &manager, &Default::default())
                .unwrap();
        assert_eq!(session.step, 0);
        assert!(session.optimizer.is_empty());
        assert!(session.extra.is_empty());
    }

    #[test]
    fn test_checkpoint_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = CheckpointManager::new(config.checkpoint.clone());
        let device = Default::default();

        let mut session = TrainingSession::<TestBackend>::fresh(&config, &device);
        for _ in 0..3 {
            train_step(&mut session);
        }
        assert!(session.should_checkpoint(&manager));
        session
            .extra
            .insert("loss_history".into(), serde_json::json!([0.5, 0.25]));
        let path = session.checkpoint(&manager).unwrap();
        assert_eq!(path, dir.path().join("chkpnt0000003.ckpt"));

        let mut resumed =
            TrainingSession::<TestBackend>::resume_or_fresh(&config, &manager, &device).unwrap();
        assert_eq!(resumed.step, 3);
        assert_eq!(resumed.model.active_sh_degree(), 1);
        assert_eq!(resumed.extra, session.extra);
        assert_eq!(
            values(resumed.model.means.val()),
            values(session.model.means.val())
        );
        assert_eq!(
            session.rng.host().random::<u64>(),
            resumed.rng.host().random::<u64>()
        );

        // Training continues identically from the restored state.
        train_step(&mut session);
        train_step(&mut resumed);
        assert_eq!(
            values(resumed.model.scales.val()),
            values(session.model.scales.val())
        );
        assert!(!resumed.should_checkpoint(&manager));
    }
}
