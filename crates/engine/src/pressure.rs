//! CPU/memory pressure calculation from a non-streaming container stats
//! sample (§4.3.6).

use taskgw_adapters::StatsSample;

/// `(cpu_percent, memory_percent)`, both clamped to `[0, 100]` implicitly by
/// the formulas below (division never exceeds the whole when the deltas are
/// sane; degenerate samples return 0).
pub fn calculate(sample: StatsSample) -> (f64, f64) {
    let cpu_delta = sample.cpu_total_usage as i64 - sample.pre_cpu_total_usage as i64;
    let system_delta = sample.cpu_system_usage as i64 - sample.pre_cpu_system_usage as i64;
    let online_cpus = if sample.online_cpus > 0 {
        sample.online_cpus
    } else if sample.per_cpu_usage_len > 0 {
        sample.per_cpu_usage_len
    } else {
        1
    };

    let cpu_percent = if cpu_delta <= 0 || system_delta <= 0 || online_cpus == 0 {
        0.0
    } else {
        (cpu_delta as f64 / system_delta as f64) * online_cpus as f64 * 100.0
    };

    let memory_percent = if sample.memory_limit == 0 {
        0.0
    } else {
        (sample.memory_usage as f64 / sample.memory_limit as f64) * 100.0
    };

    (cpu_percent, memory_percent)
}

#[cfg(test)]
#[path = "pressure_tests.rs"]
mod tests;
