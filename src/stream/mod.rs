pub mod sse;

pub use sse::{
    parse_upstream_line, upstream_line_stream, LineEvent, UpstreamLineDecoder, DONE_FRAME,
};
