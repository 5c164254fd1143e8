pub mod compiler;
pub mod model;

pub use compiler::{MemoryImage, WORDS_PER_CHANNEL};
pub use model::{
    ChannelEntryDocument, PolynomialConfig, PolynomialDocument, Slot, ValidFlag,
    VirtualChannelConfig, POLY_COEFFICIENTS,
};
