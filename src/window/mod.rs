pub mod period;

pub use period::{
    to_epoch_seconds, RawTimeSpec, TimeSpec, TimeWindow, WindowError, MAX_RECENT_SECONDS,
    STREAM_HORIZON_DAYS,
};
