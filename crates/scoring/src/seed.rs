use candle_core::Device;
use rand::{rngs::StdRng, SeedableRng};

/// Seeds the device RNG (warn-and-continue on failure, some backends have no
/// seedable generator) and returns a seeded host RNG for everything else.
pub fn seed_everything(seed: u64, device: &Device) -> StdRng {
    if let Err(err) = device.set_seed(seed) {
        eprintln!("warning: failed to seed device RNG: {}", err);
    }
    StdRng::seed_from_u64(seed)
}
