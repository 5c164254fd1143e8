pub mod debug_record;
pub mod parser;

pub use debug_record::{decode_records, summarize, DebugSummary, HardwareTraceRecord};
pub use parser::{parse_trace, parse_trace_reader, HardwareTrace, PacketMetadata, TraceFormat, TracePacket};
