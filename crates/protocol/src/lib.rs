pub mod buffers;
pub mod shared_str;
pub mod types;

pub use buffers::{
    ColumnarLayout, FreqBuffer, LayoutError, SLICE_FLAG_INCOMPLETE, SLICE_FLAG_REALTIME,
    SliceBuffer, ThreadStateBuffer,
};
pub use shared_str::{SharedStr, StrInterner};
pub use types::{Duration, SpanError, Time, TimeSpan};
