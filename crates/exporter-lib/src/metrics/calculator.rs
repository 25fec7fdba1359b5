//! Derived-metric math
//!
//! Pure functions turning raw samples into exported values. Delta-based
//! values degrade to `0` whenever history is missing or inconsistent.

use crate::models::{BlkioEntry, InterfaceStats, IoStats, NetworkStats, RawSample};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Convert a cumulative nanosecond counter to seconds
pub fn nanos_to_seconds(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}

/// CPU usage percentage between two samples of the same workload
///
/// Returns `0` when there is no previous sample, when the cumulative counter
/// did not advance (reset or skew) or when the elapsed time is not positive.
/// The result is not scaled by the number of online CPUs.
pub fn cpu_percent(current: &RawSample, previous: Option<&RawSample>) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };

    if current.cpu.total <= previous.cpu.total {
        return 0.0;
    }

    let elapsed = current.timestamp - previous.timestamp;
    let elapsed_secs = match elapsed.num_nanoseconds() {
        Some(nanos) => nanos as f64 / NANOS_PER_SECOND,
        None => elapsed.num_milliseconds() as f64 / 1_000.0,
    };
    if elapsed_secs <= 0.0 {
        return 0.0;
    }

    let cpu_delta_secs = nanos_to_seconds(current.cpu.total - previous.cpu.total);
    cpu_delta_secs / elapsed_secs * 100.0
}

/// Memory usage as a percentage of the limit, `0` without a limit
pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}

/// Free memory in bytes; negative when usage exceeds the limit
pub fn free_memory(usage: u64, limit: u64) -> f64 {
    limit as f64 - usage as f64
}

/// Free memory as a percentage of the limit, `0` without a limit
pub fn free_memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    free_memory(usage, limit) / limit as f64 * 100.0
}

/// Sum block I/O entries into read and written totals
///
/// Operations are matched case-insensitively against `read` and `write`,
/// anything else is ignored.
pub fn aggregate_io<'a>(entries: impl IntoIterator<Item = &'a BlkioEntry>) -> IoStats {
    entries.into_iter().fold(IoStats::default(), |mut acc, entry| {
        if entry.op.eq_ignore_ascii_case("read") {
            acc.read = acc.read.saturating_add(entry.value);
        } else if entry.op.eq_ignore_ascii_case("write") {
            acc.written = acc.written.saturating_add(entry.value);
        }
        acc
    })
}

/// Sum per-interface counters into workload totals
pub fn aggregate_network<'a>(
    interfaces: impl IntoIterator<Item = &'a InterfaceStats>,
) -> NetworkStats {
    interfaces
        .into_iter()
        .fold(NetworkStats::default(), |mut acc, iface| {
            acc.rx_bytes = acc.rx_bytes.saturating_add(iface.rx_bytes);
            acc.rx_packets = acc.rx_packets.saturating_add(iface.rx_packets);
            acc.rx_dropped = acc.rx_dropped.saturating_add(iface.rx_dropped);
            acc.rx_errors = acc.rx_errors.saturating_add(iface.rx_errors);
            acc.tx_bytes = acc.tx_bytes.saturating_add(iface.tx_bytes);
            acc.tx_packets = acc.tx_packets.saturating_add(iface.tx_packets);
            acc.tx_dropped = acc.tx_dropped.saturating_add(iface.tx_dropped);
            acc.tx_errors = acc.tx_errors.saturating_add(iface.tx_errors);
            acc
        })
}
