mod gaussian;

pub use gaussian::{
    features_rest_width, sh_coefficients, GaussianModel, GaussianModelConfig, GaussianModelRecord,
    GaussianState,
};
