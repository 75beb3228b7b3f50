use burn::module::Param;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder};
use burn::tensor::activation::sigmoid;
use burn::tensor::TensorData;
use rand::Rng;

use crate::checkpoint::ModelState;
use crate::error::StateError;
use crate::rng::RngContext;

/// Zeroth-order spherical harmonic constant.
const SH_C0: f32 = 0.282_094_8;

/// Number of SH coefficients per colour channel for a given degree.
pub fn sh_coefficients(degree: usize) -> usize {
    (degree + 1) * (degree + 1)
}

/// Width of the higher-order colour tensor for a given maximum degree.
pub fn features_rest_width(max_sh_degree: usize) -> usize {
    3 * (sh_coefficients(max_sh_degree) - 1)
}

/// Initialisation settings for a Gaussian cloud.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GaussianModelConfig {
    pub sh_degree: usize,
    /// Half-width of the cube random positions are drawn from.
    pub initial_extent: f32,
    pub initial_scale: f32,
    pub initial_opacity: f32,
}

impl Default for GaussianModelConfig {
    fn default() -> Self {
        GaussianModelConfig {
            sh_degree: 3,
            initial_extent: 1.0,
            initial_scale: 0.01,
            initial_opacity: 0.1,
        }
    }
}

impl GaussianModelConfig {
    /// Random cloud of `num_points` splats. Positions and base colours are
    /// drawn from the host generator of `rng`.
    pub fn init<B: Backend>(
        &self,
        num_points: usize,
        rng: &mut RngContext,
        device: &B::Device,
    ) -> GaussianModel<B> {
        let host = rng.host();
        let extent = self.initial_extent;

        let means: Vec<f32> = (0..num_points * 3)
            .map(|_| host.random_range(-extent..=extent))
            .collect();
        let features_dc: Vec<f32> = (0..num_points * 3)
            .map(|_| (host.random_range(0.0f32..1.0) - 0.5) / SH_C0)
            .collect();
        let rest_width = features_rest_width(self.sh_degree);
        let scales = vec![self.initial_scale.ln(); num_points * 3];
        let rotations: Vec<f32> = (0..num_points)
            .flat_map(|_| [1.0, 0.0, 0.0, 0.0])
            .collect();
        let opacity_logit = (self.initial_opacity / (1.0 - self.initial_opacity)).ln();
        let opacities = vec![opacity_logit; num_points];

        GaussianModel {
            means: param(means, [num_points, 3], device),
            features_dc: param(features_dc, [num_points, 3], device),
            features_rest: Param::from_tensor(Tensor::zeros([num_points, rest_width], device)),
            scales: param(scales, [num_points, 3], device),
            rotations: param(rotations, [num_points, 4], device),
            opacities: param(opacities, [num_points, 1], device),
            active_sh_degree: 0,
            max_sh_degree: self.sh_degree,
        }
    }
}

fn param<B: Backend>(values: Vec<f32>, shape: [usize; 2], device: &B::Device) -> Param<Tensor<B, 2>> {
    Param::from_tensor(Tensor::from_data(TensorData::new(values, shape), device))
}

/// Gaussian splat cloud.
///
/// ```text
/// means          [N, 3]   world-space centres
/// features_dc    [N, 3]   degree-0 SH colour
/// features_rest  [N, 3 * ((d + 1)^2 - 1)]   higher-order SH, d = max_sh_degree
/// scales         [N, 3]   log-space
/// rotations      [N, 4]   unnormalised quaternions (w, x, y, z)
/// opacities      [N, 1]   logits
/// ```
#[derive(Module, Debug)]
pub struct GaussianModel<B: Backend> {
    pub means: Param<Tensor<B, 2>>,
    pub features_dc: Param<Tensor<B, 2>>,
    pub features_rest: Param<Tensor<B, 2>>,
    pub scales: Param<Tensor<B, 2>>,
    pub rotations: Param<Tensor<B, 2>>,
    pub opacities: Param<Tensor<B, 2>>,
    active_sh_degree: usize,
    max_sh_degree: usize,
}

/// Everything a restored model needs. Degrees are stored explicitly since
/// plain fields are not part of the module record.
#[derive(Record)]
pub struct GaussianState<B: Backend> {
    pub params: GaussianModelRecord<B>,
    pub active_sh_degree: usize,
    pub max_sh_degree: usize,
}

impl<B: Backend> GaussianModel<B> {
    /// Model with zero splats, used as the target of a record load.
    fn empty(max_sh_degree: usize, device: &B::Device) -> Self {
        let zeros = |width: usize| Param::from_tensor(Tensor::zeros([0, width], device));
        GaussianModel {
            means: zeros(3),
            features_dc: zeros(3),
            features_rest: zeros(features_rest_width(max_sh_degree)),
            scales: zeros(3),
            rotations: zeros(4),
            opacities: zeros(1),
            active_sh_degree: 0,
            max_sh_degree,
        }
    }

    pub fn num_points(&self) -> usize {
        self.means.val().dims()[0]
    }

    pub fn active_sh_degree(&self) -> usize {
        self.active_sh_degree
    }

    pub fn max_sh_degree(&self) -> usize {
        self.max_sh_degree
    }

    /// Enable the next SH band. Returns false once the maximum is reached.
    pub fn oneup_sh_degree(&mut self) -> bool {
        if self.active_sh_degree < self.max_sh_degree {
            self.active_sh_degree += 1;
            true
        } else {
            false
        }
    }

    pub fn scaling(&self) -> Tensor<B, 2> {
        self.scales.val().exp()
    }

    pub fn opacity(&self) -> Tensor<B, 2> {
        sigmoid(self.opacities.val())
    }

    pub fn rotation(&self) -> Tensor<B, 2> {
        let rotations = self.rotations.val();
        let norm = rotations
            .clone()
            .powf_scalar(2.0)
            .sum_dim(1)
            .sqrt()
            .clamp_min(1e-12);
        rotations / norm
    }

    /// Shapes of all parameter tensors, keyed by group name.
    pub fn param_shapes(&self) -> [(&'static str, [usize; 2]); 6] {
        [
            ("xyz", self.means.val().dims()),
            ("f_dc", self.features_dc.val().dims()),
            ("f_rest", self.features_rest.val().dims()),
            ("opacity", self.opacities.val().dims()),
            ("scaling", self.scales.val().dims()),
            ("rotation", self.rotations.val().dims()),
        ]
    }

    /// Snapshot as a burn record in named MessagePack.
    pub fn to_state(&self) -> Result<Vec<u8>, StateError> {
        let state = GaussianState {
            params: self.clone().into_record(),
            active_sh_degree: self.active_sh_degree,
            max_sh_degree: self.max_sh_degree,
        };
        Recorder::<B>::record(&recorder(), state, ()).map_err(|e| StateError::Encode(e.to_string()))
    }

    /// Rebuild a model from a [`to_state`](Self::to_state) snapshot, placing
    /// every tensor on `device`.
    pub fn from_state(blob: &[u8], device: &B::Device) -> Result<Self, StateError> {
        let state: GaussianState<B> = Recorder::<B>::load(&recorder(), blob.to_vec(), device)
            .map_err(|e| StateError::Decode(e.to_string()))?;

        let mut model = GaussianModel::empty(state.max_sh_degree, device).load_record(state.params);
        model.active_sh_degree = state.active_sh_degree;
        model.check_consistency()?;
        Ok(model)
    }

    fn check_consistency(&self) -> Result<(), StateError> {
        if self.active_sh_degree > self.max_sh_degree {
            return Err(StateError::Inconsistent(format!(
                "active_sh_degree {} exceeds max_sh_degree {}",
                self.active_sh_degree, self.max_sh_degree
            )));
        }

        let n = self.num_points();
        let rest = features_rest_width(self.max_sh_degree);
        let expected = [
            ("xyz", [n, 3]),
            ("f_dc", [n, 3]),
            ("f_rest", [n, rest]),
            ("opacity", [n, 1]),
            ("scaling", [n, 3]),
            ("rotation", [n, 4]),
        ];
        for ((name, found), (_, expected)) in self.param_shapes().into_iter().zip(expected) {
            if found != expected {
                return Err(StateError::ShapeMismatch {
                    name: name.to_string(),
                    expected: expected.to_vec(),
                    found: found.to_vec(),
                });
            }
        }
        Ok(())
    }
}

fn recorder() -> NamedMpkBytesRecorder<FullPrecisionSettings> {
    NamedMpkBytesRecorder::default()
}

impl<B: Backend> ModelState for GaussianModel<B> {
    type Backend = B;

    fn export_state(&self) -> Result<Vec<u8>, StateError> {
        self.to_state()
    }

    fn diagnostic(&self) -> String {
        format!("active_sh_degree={}", self.active_sh_degree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor.into_data().to_vec().expect("f32 tensor data extraction")
    }

    fn test_model(num_points: usize) -> GaussianModel<TestBackend> {
        let mut rng = RngContext::seeded(11, 0);
        GaussianModelConfig::default().init(num_points, &mut rng, &Default::default())
    }

    #[test]
    fn test_init_shapes() {
        let model = test_model(16);
        assert_eq!(model.num_points(), 16);
        assert_eq!(model.means.val().dims(), [16, 3]);
        assert_eq!(model.features_rest.val().dims(), [16, 45]);
        assert_eq!(model.rotations.val().dims(), [16, 4]);
        assert_eq!(model.opacities.val().dims(), [16, 1]);
        assert_eq!(model.active_sh_degree(), 0);
        assert_eq!(model.max_sh_degree(), 3);
    }

    #[test]
    fn test_init_is_deterministic_for_seed() {
        let a = test_model(8);
        let b = test_model(8);
        assert_eq!(values(a.means.val()), values(b.means.val()));
    }

    #[test]
    fn test_init_means_within_extent() {
        let model = test_model(64);
        assert!(values(model.means.val()).iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_activations() {
        let model = test_model(4);
        for v in values(model.opacity()) {
            assert!((v - 0.1).abs() < 1e-5);
        }
        for v in values(model.scaling()) {
            assert!((v - 0.01).abs() < 1e-6);
        }
        let rotation = values(model.rotation());
        assert_eq!(&rotation[..4], &[1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_oneup_sh_degree_caps_at_max() {
        let mut model = test_model(2);
        assert!(model.oneup_sh_degree());
        assert!(model.oneup_sh_degree());
        assert!(model.oneup_sh_degree());
        assert!(!model.oneup_sh_degree());
        assert_eq!(model.active_sh_degree(), 3);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut model = test_model(10);
        model.oneup_sh_degree();
        let blob = model.to_state().unwrap();

        let restored = GaussianModel::<TestBackend>::from_state(&blob, &Default::default()).unwrap();
        assert_eq!(restored.num_points(), 10);
        assert_eq!(restored.active_sh_degree(), 1);
        assert_eq!(restored.max_sh_degree(), 3);
        assert_eq!(values(restored.means.val()), values(model.means.val()));
        assert_eq!(values(restored.features_dc.val()), values(model.features_dc.val()));
        assert_eq!(restored.diagnostic(), "active_sh_degree=1");
    }

    #[test]
    fn test_from_state_rejects_garbage() {
        let err = GaussianModel::<TestBackend>::from_state(&[1, 2, 3], &Default::default())
            .unwrap_err();
        assert!(matches!(err, StateError::Decode(_)), "got: {err}");
    }

    #[test]
    fn test_from_state_rejects_inconsistent_rows() {
        let mut model = test_model(6);
        model.opacities = Param::from_tensor(Tensor::zeros([5, 1], &Default::default()));
        let blob = model.to_state().unwrap();

        let err = GaussianModel::<TestBackend>::from_state(&blob, &Default::default())
            .unwrap_err();
        match err {
            StateError::ShapeMismatch { name, expected, found } => {
                assert_eq!(name, "opacity");
                assert_eq!(expected, vec![6, 1]);
                assert_eq!(found, vec![5, 1]);
            }
            other => panic!("expected ShapeMismatch, got: {other}"),
        }
    }
}
