//! Galois LFSR scrambler for sync-marker framed links.
//!
//! The keystream restarts from the seed for every frame, so scrambling and
//! descrambling are the same operation.

/// Feedback polynomial (Galois form).
pub const POLYNOMIAL: u16 = 0x8016;

/// Initial register state.
pub const SEED: u16 = 0xACE1;

/// 16-bit Galois linear feedback shift register.
#[derive(Debug, Clone)]
pub struct Lfsr {
    state: u16,
    polynomial: u16,
}

impl Lfsr {
    pub fn new(polynomial: u16, seed: u16) -> Self {
        Self {
            state: seed,
            polynomial,
        }
    }

    /// Advance one step and return the output bit.
    pub fn next_bit(&mut self) -> u8 {
        let out = (self.state & 1) as u8;
        self.state >>= 1;
        if out == 1 {
            self.state ^= self.polynomial;
        }
        out
    }

    /// Eight output bits, first bit in the MSB.
    pub fn next_byte(&mut self) -> u8 {
        (0..8).fold(0u8, |acc, _| (acc << 1) | self.next_bit())
    }

    /// XOR the keystream into `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_byte();
        }
    }
}

impl Default for Lfsr {
    fn default() -> Self {
        Self::new(POLYNOMIAL, SEED)
    }
}

/// Scramble (or descramble) one frame with a fresh default register.
pub fn scramble(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    Lfsr::default().apply(&mut out);
    out
}
