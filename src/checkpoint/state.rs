use burn::tensor::backend::Backend;

use crate::error::StateError;

/// Model side of the state-export contract.
///
/// Reconstruction is not part of the trait: the loader takes a factory
/// `(bytes, device) -> model` so it never names a concrete model type.
pub trait ModelState {
    type Backend: Backend;

    /// Export an opaque snapshot of the model.
    fn export_state(&self) -> Result<Vec<u8>, StateError>;

    /// Short human-readable summary logged after a restore.
    fn diagnostic(&self) -> String;
}

/// Optimizer side of the state-export/import contract.
pub trait OptimizerState {
    type Backend: Backend;

    /// Export an opaque snapshot of the optimizer's internal state.
    fn export_state(&self) -> Result<Vec<u8>, StateError>;

    /// Replace the internal state with a snapshot. On error the optimizer
    /// must be left exactly as it was.
    fn import_state(
        &mut self,
        blob: &[u8],
        device: &<Self::Backend as Backend>::Device,
    ) -> Result<(), StateError>;
}
