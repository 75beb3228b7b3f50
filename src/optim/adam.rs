use std::collections::BTreeMap;

use burn::module::Param;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder};
use burn::tensor::backend::AutodiffBackend;

use crate::checkpoint::OptimizerState;
use crate::error::StateError;
use crate::scene::GaussianModel;

/// Parameter groups of a Gaussian model, each with its own learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamGroup {
    Position,
    FeatureDc,
    FeatureRest,
    Opacity,
    Scaling,
    Rotation,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 6] = [
        ParamGroup::Position,
        ParamGroup::FeatureDc,
        ParamGroup::FeatureRest,
        ParamGroup::Opacity,
        ParamGroup::Scaling,
        ParamGroup::Rotation,
    ];

    /// Name used in saved optimizer state.
    pub fn name(self) -> &'static str {
        match self {
            ParamGroup::Position => "xyz",
            ParamGroup::FeatureDc => "f_dc",
            ParamGroup::FeatureRest => "f_rest",
            ParamGroup::Opacity => "opacity",
            ParamGroup::Scaling => "scaling",
            ParamGroup::Rotation => "rotation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ParamGroup::ALL.into_iter().find(|group| group.name() == name)
    }

    fn param<B: Backend>(self, model: &GaussianModel<B>) -> &Param<Tensor<B, 2>> {
        match self {
            ParamGroup::Position => &model.means,
            ParamGroup::FeatureDc => &model.features_dc,
            ParamGroup::FeatureRest => &model.features_rest,
            ParamGroup::Opacity => &model.opacities,
            ParamGroup::Scaling => &model.scales,
            ParamGroup::Rotation => &model.rotations,
        }
    }
}

/// Adam hyperparameters with per-group learning rates.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SplatAdamConfig {
    pub beta_1: f32,
    pub beta_2: f32,
    pub epsilon: f32,
    pub position_lr: f64,
    pub feature_lr: f64,
    /// Divisor applied to `feature_lr` for the higher-order SH group.
    pub feature_rest_divisor: f64,
    pub opacity_lr: f64,
    pub scaling_lr: f64,
    pub rotation_lr: f64,
}

impl Default for SplatAdamConfig {
    fn default() -> Self {
        SplatAdamConfig {
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-15,
            position_lr: 0.000_16,
            feature_lr: 0.0025,
            feature_rest_divisor: 20.0,
            opacity_lr: 0.025,
            scaling_lr: 0.005,
            rotation_lr: 0.001,
        }
    }
}

impl SplatAdamConfig {
    pub fn learning_rate(&self, group: ParamGroup) -> f64 {
        match group {
            ParamGroup::Position => self.position_lr,
            ParamGroup::FeatureDc => self.feature_lr,
            ParamGroup::FeatureRest => self.feature_lr / self.feature_rest_divisor,
            ParamGroup::Opacity => self.opacity_lr,
            ParamGroup::Scaling => self.scaling_lr,
            ParamGroup::Rotation => self.rotation_lr,
        }
    }

    /// Fresh optimizer bound to the parameter shapes of `model`.
    pub fn init<B: AutodiffBackend>(&self, model: &GaussianModel<B>) -> SplatAdam<B> {
        let shapes = ParamGroup::ALL
            .into_iter()
            .map(|group| (group, group.param(model).val().dims()))
            .collect();
        SplatAdam {
            config: self.clone(),
            shapes,
            moments: BTreeMap::new(),
        }
    }
}

/// First and second moment estimates of one group.
#[derive(Debug, Clone)]
pub struct GroupMoments<B: Backend> {
    pub step: usize,
    pub exp_avg: Tensor<B, 2>,
    pub exp_avg_sq: Tensor<B, 2>,
}

#[derive(Record)]
pub struct AdamGroupRecord<B: Backend> {
    pub group: String,
    pub step: usize,
    pub exp_avg: Tensor<B, 2>,
    pub exp_avg_sq: Tensor<B, 2>,
}

#[derive(Record)]
pub struct SplatAdamRecord<B: Backend> {
    pub groups: Vec<AdamGroupRecord<B>>,
}

/// Adam over the six parameter groups of a [`GaussianModel`].
///
/// Moments live on the inner (non-autodiff) backend. A group whose
/// parameter changed shape since the last step restarts from zero moments.
#[derive(Debug)]
pub struct SplatAdam<B: AutodiffBackend> {
    config: SplatAdamConfig,
    shapes: BTreeMap<ParamGroup, [usize; 2]>,
    moments: BTreeMap<ParamGroup, GroupMoments<B::InnerBackend>>,
}

impl<B: AutodiffBackend> SplatAdam<B> {
    pub fn config(&self) -> &SplatAdamConfig {
        &self.config
    }

    pub fn moments(&self, group: ParamGroup) -> Option<&GroupMoments<B::InnerBackend>> {
        self.moments.get(&group)
    }

    /// True until the first step or state import.
    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    /// Apply one Adam update to every group that received a gradient.
    pub fn step(&mut self, mut model: GaussianModel<B>, grads: &B::Gradients) -> GaussianModel<B> {
        model.means = self.update(ParamGroup::Position, model.means, grads);
        model.features_dc = self.update(ParamGroup::FeatureDc, model.features_dc, grads);
        model.features_rest = self.update(ParamGroup::FeatureRest, model.features_rest, grads);
        model.opacities = self.update(ParamGroup::Opacity, model.opacities, grads);
        model.scales = self.update(ParamGroup::Scaling, model.scales, grads);
        model.rotations = self.update(ParamGroup::Rotation, model.rotations, grads);
        model
    }

    fn update(
        &mut self,
        group: ParamGroup,
        param: Param<Tensor<B, 2>>,
        grads: &B::Gradients,
    ) -> Param<Tensor<B, 2>> {
        let Some(grad) = param.val().grad(grads) else {
            return param;
        };
        let dims = grad.dims();
        let device = grad.device();

        let moments = match self.moments.remove(&group) {
            Some(moments) if moments.exp_avg.dims() == dims => moments,
            _ => GroupMoments {
                step: 0,
                exp_avg: Tensor::zeros(dims, &device),
                exp_avg_sq: Tensor::zeros(dims, &device),
            },
        };
        self.shapes.insert(group, dims);

        let beta_1 = self.config.beta_1 as f64;
        let beta_2 = self.config.beta_2 as f64;
        let step = moments.step + 1;

        let exp_avg = moments
            .exp_avg
            .mul_scalar(beta_1)
            .add(grad.clone().mul_scalar(1.0 - beta_1));
        let exp_avg_sq = moments
            .exp_avg_sq
            .mul_scalar(beta_2)
            .add(grad.clone().mul(grad).mul_scalar(1.0 - beta_2));

        let bias_correction_1 = bias_correction(beta_1, step);
        let bias_correction_2 = bias_correction(beta_2, step);
        let step_size = self.config.learning_rate(group) / bias_correction_1;

        let denom = exp_avg_sq
            .clone()
            .div_scalar(bias_correction_2)
            .sqrt()
            .add_scalar(self.config.epsilon);
        let delta = exp_avg.clone().div(denom).mul_scalar(step_size);

        self.moments.insert(
            group,
            GroupMoments {
                step,
                exp_avg,
                exp_avg_sq,
            },
        );

        param.map(|tensor| Tensor::from_inner(tensor.inner().sub(delta)).require_grad())
    }

    fn to_record(&self) -> SplatAdamRecord<B::InnerBackend> {
        SplatAdamRecord {
            groups: self
                .moments
                .iter()
                .map(|(group, moments)| AdamGroupRecord {
                    group: group.name().to_string(),
                    step: moments.step,
                    exp_avg: moments.exp_avg.clone(),
                    exp_avg_sq: moments.exp_avg_sq.clone(),
                })
                .collect(),
        }
    }

    /// Validate every group of `record` against the bound shapes before
    /// touching the current state.
    fn moments_from_record(
        &self,
        record: SplatAdamRecord<B::InnerBackend>,
    ) -> Result<BTreeMap<ParamGroup, GroupMoments<B::InnerBackend>>, StateError> {
        let mut moments = BTreeMap::new();
        for entry in record.groups {
            let group = ParamGroup::from_name(&entry.group)
                .ok_or_else(|| StateError::UnknownGroup(entry.group.clone()))?;
            let expected = self
                .shapes
                .get(&group)
                .copied()
                .ok_or_else(|| StateError::UnknownGroup(entry.group.clone()))?;

            for found in [entry.exp_avg.dims(), entry.exp_avg_sq.dims()] {
                if found != expected {
                    return Err(StateError::ShapeMismatch {
                        name: entry.group,
                        expected: expected.to_vec(),
                        found: found.to_vec(),
                    });
                }
            }

            moments.insert(
                group,
                GroupMoments {
                    step: entry.step,
                    exp_avg: entry.exp_avg,
                    exp_avg_sq: entry.exp_avg_sq,
                },
            );
        }
        Ok(moments)
    }
}

fn bias_correction(beta: f64, step: usize) -> f64 {
    1.0 - beta.powf(step as f64)
}

fn recorder() -> NamedMpkBytesRecorder<FullPrecisionSettings> {
    NamedMpkBytesRecorder::default()
}

impl<B: AutodiffBackend> OptimizerState for SplatAdam<B> {
    type Backend = B;

    fn export_state(&self) -> Result<Vec<u8>, StateError> {
        Recorder::<B::InnerBackend>::record(&recorder(), self.to_record(), ())
            .map_err(|e| StateError::Encode(e.to_string()))
    }

    fn import_state(&mut self, blob: &[u8], device: &B::Device) -> Result<(), StateError> {
        let record: SplatAdamRecord<B::InnerBackend> =
            Recorder::<B::InnerBackend>::load(&recorder(), blob.to_vec(), device)
                .map_err(|e| StateError::Decode(e.to_string()))?;
        self.moments = self.moments_from_record(record)?;
        Ok(())
    }
}
