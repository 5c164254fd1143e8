//! Serializes channel configuration into the two polynomial memory buffers.
//!
//! Each buffer holds 1024 blocks of 20 little-endian 32-bit words:
//!
//! | words  | contents                                  |
//! |--------|-------------------------------------------|
//! | 0..12  | c0..c5 as f64, low word first             |
//! | 12..14 | sky frequency (GHz) as f64                |
//! | 14..16 | buffer epoch offset (s) as f64            |
//! | 16..18 | Y polarisation offset (ns) as f64         |
//! | 18     | validity integration                      |
//! | 19     | valid word                                |

use crate::config::model::{Slot, VirtualChannelConfig, POLY_COEFFICIENTS};
use crate::prelude::{ModelError, ModelResult, MAX_VIRTUAL_CHANNELS};
use log::info;
use std::collections::BTreeSet;
use std::fmt::Write as _;

pub const WORDS_PER_CHANNEL: usize = 20;
pub const BYTES_PER_CHANNEL: usize = WORDS_PER_CHANNEL * 4;
pub const WORDS_PER_BUFFER: usize = MAX_VIRTUAL_CHANNELS * WORDS_PER_CHANNEL;
/// Byte address of buffer 1 in the configuration address space.
pub const BUFFER1_BYTE_OFFSET: usize = MAX_VIRTUAL_CHANNELS * BYTES_PER_CHANNEL;

const DENSE_PAGE_WORDS: usize = 1024;
const DENSE_PAGES: usize = 2 * WORDS_PER_BUFFER / DENSE_PAGE_WORDS;
const DENSE_DUMP_PATH: &str = "vd_datagen.vd_ram.data";

const SKY_FREQ_WORD: usize = 12;
const BUFFER_OFFSET_WORD: usize = 14;
const YPOL_OFFSET_WORD: usize = 16;
const INTEGRATION_WORD: usize = 18;
const VALID_WORD: usize = 19;

fn split_f64(value: f64) -> [u32; 2] {
    let bits = value.to_bits();
    [bits as u32, (bits >> 32) as u32]
}

fn join_f64(words: &[u32]) -> f64 {
    f64::from_bits(u64::from(words[0]) | (u64::from(words[1]) << 32))
}

/// Encodes one slot into its 20-word block.
pub fn encode_slot(slot: &Slot) -> [u32; WORDS_PER_CHANNEL] {
    let mut block = [0u32; WORDS_PER_CHANNEL];
    for (k, &coefficient) in slot.coefficients.iter().enumerate() {
        block[2 * k..2 * k + 2].copy_from_slice(&split_f64(coefficient));
    }
    block[SKY_FREQ_WORD..SKY_FREQ_WORD + 2].copy_from_slice(&split_f64(slot.sky_freq_ghz));
    block[BUFFER_OFFSET_WORD..BUFFER_OFFSET_WORD + 2]
        .copy_from_slice(&split_f64(slot.buffer_offset_s));
    block[YPOL_OFFSET_WORD..YPOL_OFFSET_WORD + 2].copy_from_slice(&split_f64(slot.ypol_offset_ns));
    // Both words carry the bit pattern of a signed 32-bit value.
    block[INTEGRATION_WORD] = slot.validity_integration as i32 as u32;
    block[VALID_WORD] = slot.valid_word as u32;
    block
}

/// Decodes a 20-word block back into a slot.
pub fn decode_slot(block: &[u32]) -> Slot {
    let mut coefficients = [0.0; POLY_COEFFICIENTS];
    for (k, coefficient) in coefficients.iter_mut().enumerate() {
        *coefficient = join_f64(&block[2 * k..2 * k + 2]);
    }
    Slot {
        coefficients,
        sky_freq_ghz: join_f64(&block[SKY_FREQ_WORD..]),
        buffer_offset_s: join_f64(&block[BUFFER_OFFSET_WORD..]),
        ypol_offset_ns: join_f64(&block[YPOL_OFFSET_WORD..]),
        validity_integration: block[INTEGRATION_WORD],
        valid_word: block[VALID_WORD] as i32,
    }
}

/// The pair of configuration buffers loaded into the corner turn.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryImage {
    pub buffer0: Vec<u32>,
    pub buffer1: Vec<u32>,
    pub max_channel_index: u32,
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self {
            buffer0: vec![0; WORDS_PER_BUFFER],
            buffer1: vec![0; WORDS_PER_BUFFER],
            max_channel_index: 0,
        }
    }
}

impl MemoryImage {
    /// Builds both buffers from validated channel configuration.
    ///
    /// Channels that are not listed stay zeroed, which the hardware reads as invalid.
    pub fn compile<'a, I>(channels: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = &'a VirtualChannelConfig>,
    {
        let mut image = MemoryImage::default();
        let mut seen = BTreeSet::new();

        for channel in channels {
            let vc = channel.virtual_channel;
            if vc as usize >= MAX_VIRTUAL_CHANNELS {
                return Err(ModelError::ChannelRange(vc));
            }
            if !seen.insert(vc) {
                return Err(ModelError::DuplicateChannel(vc));
            }
            image.max_channel_index = image.max_channel_index.max(vc);

            let start = vc as usize * WORDS_PER_CHANNEL;
            image.buffer0[start..start + WORDS_PER_CHANNEL]
                .copy_from_slice(&encode_slot(&channel.slot0));
            image.buffer1[start..start + WORDS_PER_CHANNEL]
                .copy_from_slice(&encode_slot(&channel.slot1));
        }

        info!(
            "compiled {} channels, highest virtual channel {}",
            seen.len(),
            image.max_channel_index
        );
        Ok(image)
    }

    fn block(buffer: &[u32], vc: usize) -> &[u32] {
        &buffer[vc * WORDS_PER_CHANNEL..(vc + 1) * WORDS_PER_CHANNEL]
    }

    pub fn decode_channel(&self, virtual_channel: u32) -> ModelResult<VirtualChannelConfig> {
        let vc = virtual_channel as usize;
        if vc >= MAX_VIRTUAL_CHANNELS {
            return Err(ModelError::ChannelRange(virtual_channel));
        }
        Ok(VirtualChannelConfig::new(
            virtual_channel,
            decode_slot(Self::block(&self.buffer0, vc)),
            decode_slot(Self::block(&self.buffer1, vc)),
        ))
    }

    fn channel_is_populated(&self, vc: usize) -> bool {
        Self::block(&self.buffer0, vc).iter().any(|&w| w != 0)
            || Self::block(&self.buffer1, vc).iter().any(|&w| w != 0)
    }

    /// Address-prefixed blocks for every populated channel up to the highest configured one.
    pub fn sparse_dump(&self) -> String {
        let mut out = String::new();
        for vc in 0..=self.max_channel_index as usize {
            if !self.channel_is_populated(vc) {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = write!(out, "[{:08x}]", vc * BYTES_PER_CHANNEL);
            for word in Self::block(&self.buffer0, vc) {
                let _ = write!(out, "\n{:08x}", word);
            }
            let _ = write!(out, "\n[{:08x}]", BUFFER1_BYTE_OFFSET + vc * BYTES_PER_CHANNEL);
            for word in Self::block(&self.buffer1, vc) {
                let _ = write!(out, "\n{:08x}", word);
            }
        }
        out
    }

    /// The full configuration address space, used to initialise memory at startup.
    pub fn dense_dump(&self) -> String {
        let mut out = String::with_capacity(DENSE_PAGES * (DENSE_PAGE_WORDS * 11 + 40));
        let words = self.buffer0.iter().chain(self.buffer1.iter()).copied();
        for (index, word) in words.enumerate() {
            if index % DENSE_PAGE_WORDS == 0 {
                if index > 0 {
                    out.push('\n');
                }
                let _ = write!(out, "[{}][{}]", DENSE_DUMP_PATH, index);
            }
            let _ = write!(out, "\n0x{:08x}", word);
        }
        out
    }

    /// Reads a sparse dump back into a memory image.
    pub fn from_sparse_dump(text: &str) -> ModelResult<Self> {
        let mut image = MemoryImage::default();
        let mut cursor: Option<usize> = None;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let parse_error = |reason: String| ModelError::Parse {
                line: number + 1,
                reason,
            };

            if let Some(address) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let byte_address = usize::from_str_radix(address, 16)
                    .map_err(|e| parse_error(format!("bad address {}: {}", address, e)))?;
                if byte_address % 4 != 0 || byte_address >= 2 * BUFFER1_BYTE_OFFSET {
                    return Err(parse_error(format!("address {:#x} out of range", byte_address)));
                }
                cursor = Some(byte_address / 4);
                continue;
            }

            let word_index =
                cursor.ok_or_else(|| parse_error("data word before first address".into()))?;
            if word_index >= 2 * WORDS_PER_BUFFER {
                return Err(parse_error("block runs past end of memory".into()));
            }
            let word = u32::from_str_radix(line, 16)
                .map_err(|e| parse_error(format!("bad word {}: {}", line, e)))?;

            if word_index < WORDS_PER_BUFFER {
                image.buffer0[word_index] = word;
            } else {
                image.buffer1[word_index - WORDS_PER_BUFFER] = word;
            }
            let vc = (word_index % WORDS_PER_BUFFER) / WORDS_PER_CHANNEL;
            image.max_channel_index = image.max_channel_index.max(vc as u32);
            cursor = Some(word_index + 1);
        }

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(c0: f64, valid: bool, integration: u32) -> Slot {
        Slot {
            coefficients: [c0, 0.5, 0.0, 0.0, 0.0, -1.25],
            sky_freq_ghz: 0.05078125,
            buffer_offset_s: 2.5,
            ypol_offset_ns: -3.0,
            validity_integration: integration,
            valid_word: i32::from(valid),
        }
    }

    #[test]
    fn valid_word_keeps_configured_bit_pattern() {
        let mut slot0 = slot(1.0, true, 0);
        slot0.valid_word = 5;
        let mut slot1 = slot(2.0, true, 3);
        slot1.valid_word = -1;
        let channel = VirtualChannelConfig::new(4, slot0, slot1);
        let image = MemoryImage::compile([&channel]).unwrap();
        let base = 4 * WORDS_PER_CHANNEL;
        assert_eq!(image.buffer0[base + VALID_WORD], 5);
        assert_eq!(image.buffer1[base + VALID_WORD], 0xffff_ffff);
        assert_eq!(image.decode_channel(4).unwrap(), channel);
    }

    #[test]
    fn zero_channel_compiles_to_zero_image() {
        let channel = VirtualChannelConfig::new(0, Slot::default(), Slot::default());
        let image = MemoryImage::compile([&channel]).unwrap();
        assert!(image.buffer0.iter().all(|&w| w == 0));
        assert!(image.buffer1.iter().all(|&w| w == 0));
        assert_eq!(image.sparse_dump(), "");
    }

    #[test]
    fn block_layout_places_fields_at_word_offsets() {
        let block = encode_slot(&slot(1000.0, true, 0xFFFF_FFFE));
        let c0 = 1000.0f64.to_bits();
        assert_eq!(block[0], c0 as u32);
        assert_eq!(block[1], (c0 >> 32) as u32);
        assert_eq!(join_f64(&block[12..14]), 0.05078125);
        assert_eq!(join_f64(&block[14..16]), 2.5);
        assert_eq!(join_f64(&block[16..18]), -3.0);
        assert_eq!(block[18], 0xFFFF_FFFE);
        assert_eq!(block[19], 1);
    }

    #[test]
    fn channels_land_at_their_own_block() {
        let channel = VirtualChannelConfig::new(5, slot(1.0, true, 3), slot(2.0, false, 7));
        let image = MemoryImage::compile([&channel]).unwrap();
        assert_eq!(image.max_channel_index, 5);
        assert!(image.buffer0[..5 * WORDS_PER_CHANNEL].iter().all(|&w| w == 0));
        assert_eq!(image.decode_channel(5).unwrap(), channel);
    }

    #[test]
    fn out_of_range_and_duplicate_channels_fail() {
        let high = VirtualChannelConfig::new(1024, Slot::default(), Slot::default());
        assert!(matches!(
            MemoryImage::compile([&high]),
            Err(ModelError::ChannelRange(1024))
        ));

        let a = VirtualChannelConfig::new(2, slot(1.0, true, 0), Slot::default());
        assert!(matches!(
            MemoryImage::compile([&a, &a]),
            Err(ModelError::DuplicateChannel(2))
        ));
    }

    #[test]
    fn sparse_dump_emits_both_buffers_per_channel() {
        let channel = VirtualChannelConfig::new(2, slot(1.0, true, 0), Slot::default());
        let image = MemoryImage::compile([&channel]).unwrap();
        let dump = image.sparse_dump();
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 42);
        assert_eq!(lines[0], "[000000a0]");
        assert_eq!(lines[21], format!("[{:08x}]", 1024 * 80 + 2 * 80));
        assert_eq!(lines[20], "00000001");
        assert!(!dump.ends_with('\n'));

        let reloaded = MemoryImage::from_sparse_dump(&dump).unwrap();
        assert_eq!(reloaded, image);
    }

    #[test]
    fn slot1_only_channel_is_still_dumped() {
        let channel = VirtualChannelConfig::new(0, Slot::default(), slot(4.0, true, 9));
        let image = MemoryImage::compile([&channel]).unwrap();
        assert!(image.sparse_dump().starts_with("[00000000]"));
    }

    #[test]
    fn dense_dump_covers_full_address_space() {
        let channel = VirtualChannelConfig::new(1023, slot(1.0, true, 1), slot(2.0, true, 2));
        let image = MemoryImage::compile([&channel]).unwrap();
        let dump = image.dense_dump();
        let headers: Vec<&str> = dump.lines().filter(|l| l.starts_with('[')).collect();
        let words = dump.lines().filter(|l| l.starts_with("0x")).count();

        assert_eq!(headers.len(), 40);
        assert_eq!(headers[0], "[vd_datagen.vd_ram.data][0]");
        assert_eq!(headers[39], "[vd_datagen.vd_ram.data][39936]");
        assert_eq!(words, 2 * 1024 * 20);
        assert!(dump.lines().nth(1).unwrap().starts_with("0x"));
    }

    #[test]
    fn sparse_dump_parser_rejects_orphan_words() {
        assert!(matches!(
            MemoryImage::from_sparse_dump("00000001"),
            Err(ModelError::Parse { line: 1, .. })
        ));
    }
}
