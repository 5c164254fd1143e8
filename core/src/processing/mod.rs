pub mod channelizer;
pub mod deripple;

pub use channelizer::{
    ChannelizerOutput, FilterOptions, FilterbankConfig, PolyphaseFilterbank, SaturationReport,
};
pub use deripple::DerippleFilter;
