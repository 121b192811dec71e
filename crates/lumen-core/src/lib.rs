// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Process-wide logging setup shared by every lumen crate.
//!
//! Library code names its component through the `tracing` target
//! (`error!(target: "swapchain", ...)`), and the subscriber installed here
//! prints each event as
//!
//! ```text
//! [ swapchain ] ERROR
//! Failed to acquire the next image!
//! Error code: -1000001004
//! ```

use std::fmt;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless; the second call is ignored.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .event_format(ComponentFormat)
        .try_init();
}

/// `[ target ] LEVEL` header line, then the message and fields, then a newline.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComponentFormat;

impl<S, N> FormatEvent<S, N> for ComponentFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        writeln!(writer, "[ {} ] {}", meta.target(), meta.level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
