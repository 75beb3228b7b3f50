use std::collections::BTreeMap;

use burn::record::{PrecisionSettings, Record};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::rng::RngState;

/// Caller-defined auxiliary data stored alongside a checkpoint.
pub type Extra = BTreeMap<String, serde_json::Value>;

/// Everything written to a checkpoint file.
///
/// `model` and `optimizer` are opaque snapshots produced by the
/// collaborators' own export; only they can decode them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub model: Vec<u8>,
    pub optimizer: Vec<u8>,
    pub step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_state: Option<RngState>,
    #[serde(
        rename = "cuda_rng_state",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_rng_states: Option<Vec<RngState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Extra>,
}

// The record holds no tensors, so the item is the record itself regardless
// of precision.
impl<B: Backend> Record<B> for CheckpointRecord {
    type Item<S: PrecisionSettings> = CheckpointRecord;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        self
    }

    fn from_item<S: PrecisionSettings>(item: Self::Item<S>, _device: &B::Device) -> Self {
        item
    }
}
