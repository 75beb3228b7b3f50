use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Snapshot of a single ChaCha generator: key, stream and position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: [u8; 32],
    pub stream: u64,
    /// Word position as little-endian bytes.
    pub word_pos: [u8; 16],
}

impl RngState {
    fn capture(rng: &ChaCha8Rng) -> Self {
        RngState {
            seed: rng.get_seed(),
            stream: rng.get_stream(),
            word_pos: rng.get_word_pos().to_le_bytes(),
        }
    }

    fn restore(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_stream(self.stream);
        rng.set_word_pos(u128::from_le_bytes(self.word_pos));
        rng
    }
}

/// Random generators owned by a training session.
///
/// One host generator drives CPU-side sampling (initialisation, shuffling);
/// each device generator is a separate stream of the same seed. Save and
/// load read and assign these explicitly instead of touching any global
/// generator.
#[derive(Debug, Clone)]
pub struct RngContext {
    host: ChaCha8Rng,
    devices: Vec<ChaCha8Rng>,
}

impl RngContext {
    pub fn seeded(seed: u64, num_devices: usize) -> Self {
        let host = ChaCha8Rng::seed_from_u64(seed);
        let devices = (0..num_devices)
            .map(|index| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(index as u64 + 1);
                rng
            })
            .collect();
        RngContext { host, devices }
    }

    pub fn host(&mut self) -> &mut ChaCha8Rng {
        &mut self.host
    }

    pub fn device(&mut self, index: usize) -> Option<&mut ChaCha8Rng> {
        self.devices.get_mut(index)
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn host_state(&self) -> RngState {
        RngState::capture(&self.host)
    }

    pub fn set_host_state(&mut self, state: &RngState) {
        self.host = state.restore();
    }

    /// States of every device generator, in device order.
    pub fn device_states(&self) -> Vec<RngState> {
        self.devices.iter().map(RngState::capture).collect()
    }

    /// Replace all device generators with the given states. The device count
    /// follows the snapshot.
    pub fn set_device_states(&mut self, states: &[RngState]) {
        self.devices = states.iter().map(RngState::restore).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn draw(rng: &mut ChaCha8Rng, n: usize) -> Vec<u32> {
        (0..n).map(|_| rng.random()).collect()
    }

    #[test]
    fn test_host_state_restores_sequence() {
        let mut ctx = RngContext::seeded(7, 0);
        draw(ctx.host(), 13);
        let snapshot = ctx.host_state();
        let expected = draw(ctx.host(), 20);

        ctx.set_host_state(&snapshot);
        assert_eq!(draw(ctx.host(), 20), expected);
    }

    #[test]
    fn test_device_streams_are_distinct() {
        let mut ctx = RngContext::seeded(42, 2);
        let host = draw(ctx.host(), 8);
        let dev0 = draw(ctx.device(0).unwrap(), 8);
        let dev1 = draw(ctx.device(1).unwrap(), 8);
        assert_ne!(host, dev0);
        assert_ne!(dev0, dev1);
        assert!(ctx.device(2).is_none());
    }

    #[test]
    fn test_device_states_roundtrip_into_other_context() {
        let mut ctx = RngContext::seeded(3, 2);
        draw(ctx.device(1).unwrap(), 5);
        let states = ctx.device_states();

        let mut other = RngContext::seeded(99, 1);
        other.set_device_states(&states);
        assert_eq!(other.num_devices(), 2);
        assert_eq!(
            draw(other.device(1).unwrap(), 10),
            draw(ctx.device(1).unwrap(), 10)
        );
    }

    #[test]
    fn test_same_seed_same_state() {
        let a = RngContext::seeded(5, 1);
        let b = RngContext::seeded(5, 1);
        assert_eq!(a.host_state(), b.host_state());
        assert_eq!(a.device_states(), b.device_states());
    }
}
