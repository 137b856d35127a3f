use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake3::Hasher;
use getrandom::getrandom;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// ChaCha20 generator seeded from the OS, reseeded by volume and by age.
///
/// All key material the device produces (IVs, session keys, the ownership
/// secret, sequence bases, RSA keys) is drawn from the global instance.
#[derive(ZeroizeOnDrop)]
pub struct SecureRng {
    #[zeroize(skip)]
    rng: ChaCha20Rng,
    entropy_pool: [u8; 64],
    bytes_since_reseed: u64,
    last_reseed: u64,
}

impl SecureRng {
    const RESEED_THRESHOLD: u64 = 1_000_000;
    const RESEED_TIME_THRESHOLD: u64 = 3600;

    pub fn new() -> Result<Self> {
        let mut seed = [0u8; 32];
        Self::collect_seed(&mut seed)?;

        let mut entropy_pool = [0u8; 64];
        Self::collect_pool_entropy(&mut entropy_pool)?;

        let rng = ChaCha20Rng::from_seed(seed);
        seed.zeroize();

        Ok(SecureRng {
            rng,
            entropy_pool,
            bytes_since_reseed: 0,
            last_reseed: unix_now()?,
        })
    }

    pub fn fill_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
        if self.should_reseed()? {
            self.reseed()?;
        }

        self.rng.fill_bytes(dest);
        self.bytes_since_reseed += dest.len() as u64;

        Ok(())
    }

    /// Mix fresh OS entropy with the pool and restart the stream.
    pub fn reseed(&mut self) -> Result<()> {
        let mut new_seed = [0u8; 32];
        Self::collect_seed(&mut new_seed)?;

        let mut hasher = Hasher::new();
        hasher.update(&new_seed);
        hasher.update(&self.entropy_pool);
        hasher.update(&self.bytes_since_reseed.to_le_bytes());
        new_seed.copy_from_slice(hasher.finalize().as_bytes());

        self.rng = ChaCha20Rng::from_seed(new_seed);
        Self::collect_pool_entropy(&mut self.entropy_pool)?;
        self.bytes_since_reseed = 0;
        self.last_reseed = unix_now()?;

        new_seed.zeroize();
        Ok(())
    }

    fn should_reseed(&self) -> Result<bool> {
        let now = unix_now()?;
        Ok(self.bytes_since_reseed >= Self::RESEED_THRESHOLD
            || now.saturating_sub(self.last_reseed) >= Self::RESEED_TIME_THRESHOLD)
    }

    fn collect_seed(buffer: &mut [u8; 32]) -> Result<()> {
        getrandom(buffer).context("Failed to get entropy from OS")?;

        let mut hasher = Hasher::new();
        hasher.update(&buffer[..]);
        hasher.update(&std::process::id().to_le_bytes());
        let stack_addr = &buffer as *const _ as usize;
        hasher.update(&stack_addr.to_le_bytes());

        buffer.copy_from_slice(hasher.finalize().as_bytes());
        Ok(())
    }

    fn collect_pool_entropy(buffer: &mut [u8; 64]) -> Result<()> {
        let mut os_bytes = [0u8; 32];
        getrandom(&mut os_bytes).context("Failed to get entropy from OS")?;

        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        let mut hasher = Hasher::new();
        hasher.update(&os_bytes);
        hasher.update(&now.as_nanos().to_le_bytes());
        hasher.finalize_xof().fill(buffer);

        os_bytes.zeroize();
        Ok(())
    }
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Process-wide generator shared by every device instance.
pub struct GlobalSecureRng {
    rng: Arc<Mutex<SecureRng>>,
}

impl GlobalSecureRng {
    pub fn instance() -> Result<&'static GlobalSecureRng> {
        static INSTANCE: std::sync::OnceLock<GlobalSecureRng> = std::sync::OnceLock::new();
        if let Some(instance) = INSTANCE.get() {
            return Ok(instance);
        }
        let rng = SecureRng::new().context("Failed to initialize global RNG")?;
        Ok(INSTANCE.get_or_init(|| GlobalSecureRng {
            rng: Arc::new(Mutex::new(rng)),
        }))
    }

    pub fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| anyhow::anyhow!("RNG mutex poisoned"))?;
        rng.fill_bytes(dest)
    }
}

/// `RngCore` view of the global generator, for APIs such as RSA key
/// generation and PKCS#1 padding that take `&mut impl CryptoRngCore`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureRngHandle;

impl RngCore for SecureRngHandle {
    fn next_u32(&mut self) -> u32 {
        let mut buffer = [0u8; 4];
        self.fill_bytes(&mut buffer);
        u32::from_le_bytes(buffer)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buffer = [0u8; 8];
        self.fill_bytes(&mut buffer);
        u64::from_le_bytes(buffer)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if self.try_fill_bytes(dest).is_err() {
            rand::rngs::OsRng.fill_bytes(dest);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        GlobalSecureRng::instance()
            .and_then(|rng| rng.fill_bytes(dest))
            .map_err(rand::Error::new)
    }
}

impl CryptoRng for SecureRngHandle {}

/// Convenience functions for common random operations
pub mod random {
    use super::*;

    pub fn bytes(len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        GlobalSecureRng::instance()?.fill_bytes(&mut buffer)?;
        Ok(buffer)
    }

    pub fn array<const N: usize>() -> Result<[u8; N]> {
        let mut array = [0u8; N];
        GlobalSecureRng::instance()?.fill_bytes(&mut array)?;
        Ok(array)
    }

    /// Fresh opaque anchor for freshness blocks and ACL versions.
    pub fn sequence_base() -> Result<String> {
        Ok(STANDARD.encode(array::<15>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_secure_rng_creation() {
        let _rng = SecureRng::new().expect("Should create RNG");
    }

    #[test]
    fn test_random_bytes_generation() {
        let mut rng = SecureRng::new().expect("Should create RNG");
        let mut buffer = [0u8; 32];
        rng.fill_bytes(&mut buffer).expect("Should generate bytes");

        assert!(buffer.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_reseed_functionality() {
        let mut rng = SecureRng::new().expect("Should create RNG");
        rng.reseed().expect("Should reseed successfully");

        let values: HashSet<[u8; 4]> = (0..100)
            .map(|_| {
                let mut buffer = [0u8; 4];
                rng.fill_bytes(&mut buffer).expect("Should generate after reseed");
                buffer
            })
            .collect();
        assert!(values.len() > 95);
    }

    #[test]
    fn test_sequence_bases_are_unique() {
        let bases: HashSet<String> = (0..200)
            .map(|_| random::sequence_base().expect("Should generate sequence base"))
            .collect();

        assert_eq!(bases.len(), 200);
        assert!(bases.iter().all(|base| base.len() == 20));
    }

    #[test]
    fn test_handle_drives_rng_core_consumers() {
        let mut handle = SecureRngHandle;
        let mut buffer = [0u8; 16];
        handle
            .try_fill_bytes(&mut buffer)
            .expect("Should fill from global RNG");
        assert!(buffer.iter().any(|&b| b != 0));
        assert_ne!(handle.next_u64(), handle.next_u64());
    }

    #[test]
    fn test_convenience_functions() {
        assert_eq!(random::bytes(10).expect("Should generate bytes").len(), 10);
        assert_eq!(random::array::<16>().expect("Should generate array").len(), 16);
    }
}
