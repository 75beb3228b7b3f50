mod adam;

pub use adam::{
    AdamGroupRecord, GroupMoments, ParamGroup, SplatAdam, SplatAdamConfig, SplatAdamRecord,
};
