use super::*;
use proptest::prelude::*;

fn sample() -> StatsSample {
    StatsSample {
        cpu_total_usage: 200,
        pre_cpu_total_usage: 100,
        cpu_system_usage: 2000,
        pre_cpu_system_usage: 1000,
        online_cpus: 4,
        per_cpu_usage_len: 4,
        memory_usage: 50,
        memory_limit: 100,
    }
}

#[test]
fn computes_percentages_from_deltas() {
    let (cpu, mem) = calculate(sample());
    assert!((cpu - 40.0).abs() < 1e-9, "(100/1000)*4*100 = 40");
    assert!((mem - 50.0).abs() < 1e-9);
}

#[test]
fn non_positive_cpu_delta_yields_zero() {
    let mut s = sample();
    s.cpu_total_usage = s.pre_cpu_total_usage;
    let (cpu, _) = calculate(s);
    assert_eq!(cpu, 0.0);
}

#[test]
fn non_positive_system_delta_yields_zero() {
    let mut s = sample();
    s.cpu_system_usage = s.pre_cpu_system_usage;
    let (cpu, _) = calculate(s);
    assert_eq!(cpu, 0.0);
}

#[test]
fn falls_back_to_per_cpu_usage_len_when_online_cpus_absent() {
    let mut s = sample();
    s.online_cpus = 0;
    s.per_cpu_usage_len = 2;
    let (cpu, _) = calculate(s);
    assert!((cpu - 20.0).abs() < 1e-9, "(100/1000)*2*100 = 20");
}

#[test]
fn falls_back_to_one_cpu_when_no_cpu_count_available() {
    let mut s = sample();
    s.online_cpus = 0;
    s.per_cpu_usage_len = 0;
    let (cpu, _) = calculate(s);
    assert!((cpu - 10.0).abs() < 1e-9, "(100/1000)*1*100 = 10");
}

#[test]
fn zero_memory_limit_yields_zero_percent() {
    let mut s = sample();
    s.memory_limit = 0;
    let (_, mem) = calculate(s);
    assert_eq!(mem, 0.0);
}

proptest! {
    /// `calculate` never panics and never reports a negative percentage,
    /// whatever raw counter values a stats sample carries (counters can wrap
    /// or regress across a container restart).
    #[test]
    fn calculate_never_panics_or_goes_negative(
        cpu_total in any::<u64>(),
        pre_cpu_total in any::<u64>(),
        cpu_system in any::<u64>(),
        pre_cpu_system in any::<u64>(),
        online_cpus in 0u32..64,
        mem_usage in any::<u64>(),
        mem_limit in any::<u64>(),
    ) {
        let s = StatsSample {
            cpu_total_usage: cpu_total,
            pre_cpu_total_usage: pre_cpu_total,
            cpu_system_usage: cpu_system,
            pre_cpu_system_usage: pre_cpu_system,
            online_cpus,
            per_cpu_usage_len: 0,
            memory_usage: mem_usage,
            memory_limit: mem_limit,
        };
        let (cpu, mem) = calculate(s);
        prop_assert!(cpu >= 0.0);
        prop_assert!(mem >= 0.0);
    }
}
