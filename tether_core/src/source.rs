use rand_core::RngCore;

/// A `BitSource` supplies the randomness a generator subprocess asks for and
/// receives the structural hints it emits along the way.
///
/// The session drives exactly three operations, in the order the generator
/// requests them: `draw_bits` for each `RAND` command, and
/// `begin_region`/`end_region` for each `START`/`END` pair. Region calls are
/// guaranteed balanced by the session; a source that does not care about
/// structure can rely on the default no-op implementations.
pub trait BitSource {
    /// Draws an unsigned integer uniformly in `[0, 2^n_bits)`.
    ///
    /// `n_bits` is at most 64. The session only ever asks for 31 bits, but
    /// sources should honor any width so they stay reusable for replay
    /// tooling.
    fn draw_bits(&mut self, n_bits: u32) -> u64;

    /// Marks the start of a labeled, nestable span of generation activity.
    fn begin_region(&mut self, _label: &str) {}

    /// Closes the most recently opened region.
    fn end_region(&mut self) {}
}

/// Big-endian assembly of up to 8 bytes, truncated to the low `n_bits`.
fn assemble_bits(bytes: &[u8], n_bits: u32) -> u64 {
    debug_assert!(n_bits <= 64);
    debug_assert!(bytes.len() <= 8);
    let mut value: u64 = 0;
    for b in bytes {
        value = (value << 8) | u64::from(*b);
    }
    if n_bits < 64 {
        value &= (1u64 << n_bits) - 1;
    }
    value
}

/// A `BitSource` backed by any [`RngCore`], recording every drawn byte.
///
/// The recorded buffer is the canonical representation of a run: feeding it
/// back through a [`BufferSource`] reproduces the same draw sequence, which
/// is what makes a generated program replayable after the fact.
pub struct RngSource<R: RngCore> {
    rng: R,
    buffer: Vec<u8>,
}

impl<R: RngCore> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            buffer: Vec::new(),
        }
    }

    /// All bytes drawn so far, in draw order.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

impl<R: RngCore> BitSource for RngSource<R> {
    fn draw_bits(&mut self, n_bits: u32) -> u64 {
        let n_bytes = n_bits.div_ceil(8) as usize;
        let mut bytes = vec![0u8; n_bytes];
        self.rng.fill_bytes(&mut bytes);
        self.buffer.extend_from_slice(&bytes);
        assemble_bits(&bytes, n_bits)
    }
}

/// A `BitSource` that replays a previously recorded byte buffer.
///
/// Draws past the end of the buffer are zero-filled, so replay is total:
/// a short buffer yields a deterministic (if degenerate) run rather than a
/// panic or an error mid-protocol.
pub struct BufferSource {
    bytes: Vec<u8>,
    cursor: usize,
}

impl BufferSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, cursor: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl BitSource for BufferSource {
    fn draw_bits(&mut self, n_bits: u32) -> u64 {
        let n_bytes = n_bits.div_ceil(8) as usize;
        let mut bytes = vec![0u8; n_bytes];
        for slot in bytes.iter_mut() {
            if let Some(b) = self.bytes.get(self.cursor) {
                *slot = *b;
                self.cursor += 1;
            }
        }
        assemble_bits(&bytes, n_bits)
    }
}
