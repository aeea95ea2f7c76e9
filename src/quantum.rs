//! Quantum: an arithmetic range coder over adaptive frequency models,
//! driving an LZ77 window of 2^10 to 2^21 bytes.

use tracing::trace;

use crate::bits::{BitOrder, BitReader};
use crate::error::Result;
use crate::window::Window;

pub(crate) const MIN_WINDOW_BITS: u32 = 10;
pub(crate) const MAX_WINDOW_BITS: u32 = 21;

const POSITION_SLOTS: usize = 42;
const LENGTH_SLOTS: usize = 27;
const RESCALE_THRESHOLD: u16 = 3800;
const FREQUENCY_STEP: u16 = 8;
const INITIAL_SHIFTS: u32 = 4;
const REBUILD_SHIFTS: u32 = 50;

const POSITION_BASE: [u32; POSITION_SLOTS] = [
    0, 1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 96, 128, 192, 256, 384, 512,
    768, 1024, 1536, 2048, 3072, 4096, 6144, 8192, 12288, 16384, 24576, 32768,
    49152, 65536, 98304, 131072, 196608, 262144, 393216, 524288, 786432,
    1048576, 1572864,
];
const POSITION_EXTRA: [u8; POSITION_SLOTS] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10,
    11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16, 17, 17, 18, 18, 19, 19,
];
const LENGTH_BASE: [u16; LENGTH_SLOTS] = [
    0, 1, 2, 3, 4, 5, 6, 8, 10, 12, 14, 18, 22, 26, 30, 38, 46, 54, 62, 78,
    94, 110, 126, 158, 190, 222, 254,
];
const LENGTH_EXTRA: [u8; LENGTH_SLOTS] = [
    0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5,
    5, 0,
];

#[derive(Clone, Copy, Debug)]
struct ModelSymbol {
    symbol: u16,
    cumulative: u16,
}

/// An adaptive frequency model.  Symbols are kept ordered by decreasing
/// cumulative frequency; the extra trailing entry holds a cumulative
/// frequency of zero.
#[derive(Clone, Debug)]
struct Model {
    symbols: Vec<ModelSymbol>,
    shifts_left: u32,
}

impl Model {
    fn new(start: u16, entries: usize) -> Model {
        let symbols = (0..=entries)
            .map(|i| ModelSymbol {
                symbol: start + i as u16,
                cumulative: (entries - i) as u16,
            })
            .collect();
        Model { symbols, shifts_left: INITIAL_SHIFTS }
    }

    fn entries(&self) -> usize {
        self.symbols.len() - 1
    }

    fn total(&self) -> u32 {
        self.symbols[0].cumulative as u32
    }

    /// Bumps the frequency of the symbol at `index` (and so the cumulative
    /// frequency of everything before it).
    fn record(&mut self, index: usize) {
        for entry in &mut self.symbols[..=index] {
            entry.cumulative += FREQUENCY_STEP;
        }
        if self.symbols[0].cumulative > RESCALE_THRESHOLD {
            self.rescale();
        }
    }

    fn rescale(&mut self) {
        let entries = self.entries();
        self.shifts_left -= 1;
        if self.shifts_left > 0 {
            for i in (0..entries).rev() {
                let halved = self.symbols[i].cumulative >> 1;
                let floor = self.symbols[i + 1].cumulative;
                self.symbols[i].cumulative =
                    if halved <= floor { floor + 1 } else { halved };
            }
            return;
        }

        self.shifts_left = REBUILD_SHIFTS;
        for i in 0..entries {
            let frequency = self.symbols[i].cumulative
                - self.symbols[i + 1].cumulative;
            self.symbols[i].cumulative = (frequency + 1) >> 1;
        }
        // Selection sort; its (in)stability is part of the format.
        for i in 0..entries.saturating_sub(1) {
            for j in i + 1..entries {
                if self.symbols[i].cumulative < self.symbols[j].cumulative {
                    self.symbols.swap(i, j);
                }
            }
        }
        for i in (0..entries).rev() {
            self.symbols[i].cumulative += self.symbols[i + 1].cumulative;
        }
    }
}

#[derive(Clone, Debug)]
struct Models {
    selector: Model,
    literals: [Model; 4],
    match3: Model,
    match4: Model,
    position: Model,
    length: Model,
}

impl Models {
    fn new(window_bits: u32) -> Models {
        let slots = 2 * window_bits as usize;
        Models {
            selector: Model::new(0, 7),
            literals: [
                Model::new(0x00, 0x40),
                Model::new(0x40, 0x40),
                Model::new(0x80, 0x40),
                Model::new(0xc0, 0x40),
            ],
            match3: Model::new(0, slots.min(24)),
            match4: Model::new(0, slots.min(36)),
            position: Model::new(0, slots),
            length: Model::new(0, LENGTH_SLOTS),
        }
    }
}

/// Range decoder registers, reset at the start of every data block.
struct Coder {
    high: u16,
    low: u16,
    code: u16,
}

impl Coder {
    fn start(reader: &mut BitReader) -> Result<Coder> {
        Ok(Coder { high: 0xffff, low: 0, code: reader.read_bits(16)? as u16 })
    }

    fn decode(&mut self, model: &mut Model, reader: &mut BitReader) -> Result<u16> {
        let high = self.high as u32;
        let low = self.low as u32;
        let total = model.total();
        let range = (high.wrapping_sub(low) & 0xffff) + 1;
        let target = ((self.code as u32)
            .wrapping_sub(low)
            .wrapping_add(1)
            .wrapping_mul(total)
            .wrapping_sub(1)
            / range)
            & 0xffff;

        let mut index = 1;
        while index < model.entries() {
            if model.symbols[index].cumulative as u32 <= target {
                break;
            }
            index += 1;
        }
        let symbol = model.symbols[index - 1].symbol;

        let range = high.wrapping_sub(low).wrapping_add(1);
        let upper = model.symbols[index - 1].cumulative as u32;
        let lower = model.symbols[index].cumulative as u32;
        self.high = low
            .wrapping_add(upper.wrapping_mul(range) / total)
            .wrapping_sub(1) as u16;
        self.low = low.wrapping_add(lower.wrapping_mul(range) / total) as u16;
        model.record(index - 1);

        loop {
            if (self.low & 0x8000) != (self.high & 0x8000) {
                if (self.low & 0x4000) != 0 && (self.high & 0x4000) == 0 {
                    self.code ^= 0x4000;
                    self.low &= 0x3fff;
                    self.high |= 0x4000;
                } else {
                    break;
                }
            }
            self.low <<= 1;
            self.high = (self.high << 1) | 1;
            self.code = (self.code << 1) | reader.read_bits(1)? as u16;
        }
        Ok(symbol)
    }
}

pub(crate) struct QuantumDecoder {
    window: Window,
    window_bits: u32,
    models: Models,
}

impl QuantumDecoder {
    pub(crate) fn new(window_bits: u32) -> Result<QuantumDecoder> {
        check_window_bits(window_bits)?;
        Ok(QuantumDecoder {
            window: Window::new(1 << window_bits)?,
            window_bits,
            models: Models::new(window_bits),
        })
    }

    /// Starts a new folder, keeping the window allocation if it is big
    /// enough.
    pub(crate) fn reconfigure(&mut self, window_bits: u32) -> Result<()> {
        check_window_bits(window_bits)?;
        self.window.reconfigure(1 << window_bits)?;
        self.window_bits = window_bits;
        self.models = Models::new(window_bits);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn window_bits(&self) -> u32 {
        self.window_bits
    }

    pub(crate) fn decompress_block(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<()> {
        let out_len = output.len();
        let mut reader = BitReader::new(input, BitOrder::MsbBe16);
        let mut coder = Coder::start(&mut reader)?;

        self.window.wrap();
        if out_len > self.window.remaining() {
            data_format!(
                "Quantum block of {} bytes straddles the window end at {}",
                out_len,
                self.window.position
            );
        }

        let models = &mut self.models;
        let mut remaining = out_len;
        while remaining > 0 {
            let selector = coder.decode(&mut models.selector, &mut reader)?;
            let (length, slot) = match selector {
                0..=3 => {
                    let model = &mut models.literals[selector as usize];
                    let byte = coder.decode(model, &mut reader)?;
                    self.window.push(byte as u8);
                    remaining -= 1;
                    continue;
                }
                4 => (3, coder.decode(&mut models.match3, &mut reader)?),
                5 => (4, coder.decode(&mut models.match4, &mut reader)?),
                6 => {
                    let slot = coder.decode(&mut models.length, &mut reader)?
                        as usize;
                    let extra = reader.read_bits(LENGTH_EXTRA[slot] as u32)?;
                    let length = LENGTH_BASE[slot] as usize + extra as usize + 5;
                    (length, coder.decode(&mut models.position, &mut reader)?)
                }
                _ => illegal_data!("Invalid Quantum selector {}", selector),
            };
            let slot = slot as usize;
            let extra = reader.read_bits(POSITION_EXTRA[slot] as u32)?;
            let offset = POSITION_BASE[slot] as usize + extra as usize + 1;
            if length > remaining {
                illegal_data!(
                    "Quantum match of {} bytes overruns the block ({} left)",
                    length,
                    remaining
                );
            }
            self.window.copy_match(offset, length)?;
            remaining -= length;
        }
        trace!(out_len, position = self.window.position, "quantum block done");
        output.copy_from_slice(self.window.recent(out_len));
        Ok(())
    }
}

fn check_window_bits(window_bits: u32) -> Result<()> {
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window_bits) {
        data_format!("Invalid Quantum window size 2^{}", window_bits);
    }
    Ok(())
}
