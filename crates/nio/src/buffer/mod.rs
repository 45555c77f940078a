//! Bounded buffers between the I/O thread and worker threads.
//!
//! A [`SharedContentBuffer`] holds at most `capacity` bytes of one message
//! body. Its two directional forms decide which side may block:
//!
//! - [`SharedInputBuffer`]: the I/O thread fills it from a content decoder and
//!   never blocks, the worker reads and blocks while it is empty.
//! - [`SharedOutputBuffer`]: the worker writes and blocks while it is full, the
//!   I/O thread drains it into a content encoder and never blocks.
//!
//! Both toggle the connection's input/output interest so the reactor only
//! reports readiness when there is room or data. [`close`] and [`shutdown`]
//! wake every blocked thread.
//!
//! [`close`]: SharedContentBuffer::close
//! [`shutdown`]: SharedContentBuffer::shutdown

mod input;
mod output;
mod shared;
mod stream;

pub use input::SharedInputBuffer;
pub use output::SharedOutputBuffer;
pub use shared::SharedContentBuffer;
pub use stream::ContentInputStream;
pub use stream::ContentOutputStream;
