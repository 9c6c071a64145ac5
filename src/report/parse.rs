//! Structured facts reported by a case in its own log
//!
//! Test scripts print a summary block such as
//!
//! ```text
//! 运行测试数: 10, 失败数: 1, 错误数: 1
//! 失败的测试:
//! - test_login: AssertionError: expected 200
//! 网络延迟: 12.5ms
//! 带宽: 80 Mbps
//! 信号强度: -67 dBm
//! ```
//!
//! Everything here is optional: a log without these lines parses to an
//! empty report.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::error;

/// Headers that introduce a list of `- name: message` lines
const DETAIL_HEADERS: &[&str] = &["失败的测试", "错误的测试"];

struct LogPatterns {
    statistics: Option<Regex>,
    detail_line: Option<Regex>,
    latency: Option<Regex>,
    bandwidth: Option<Regex>,
    signal: Option<Regex>,
}

static PATTERNS: LazyLock<LogPatterns> = LazyLock::new(|| LogPatterns {
    statistics: compile(r"(?s)运行测试数[:：]\s*(\d+).*?失败数[:：]\s*(\d+).*?错误数[:：]\s*(\d+)"),
    detail_line: compile(r"^\s*-\s*([^:：]+?)\s*[:：]\s*(.*?)\s*$"),
    latency: compile(r"网络延迟[:：]\s*([\d.]+)\s*ms"),
    bandwidth: compile(r"带宽[:：]\s*([\d.]+)\s*(Mbps|Kbps)"),
    signal: compile(r"信号强度[:：]\s*(-?[\d.]+)\s*dBm"),
});

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("Invalid log pattern {:?}: {}", pattern, e);
            None
        }
    }
}

/// Test counts printed by the case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestStatistics {
    pub total: u32,
    pub failed: u32,
    pub errors: u32,
}

impl TestStatistics {
    pub fn passed(&self) -> u32 {
        self.total.saturating_sub(self.failed.saturating_add(self.errors))
    }

    /// Percentage of passed tests; 0 when no test ran
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.passed()) / f64::from(self.total) * 100.0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }
}

impl fmt::Display for TestStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tests: total={}, passed={}, failed={}, errors={}, success rate={:.1}%",
            self.total,
            self.passed(),
            self.failed,
            self.errors,
            self.success_rate()
        )
    }
}

/// Network figures some cases measure and print
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceMetrics {
    pub network_latency_ms: Option<f64>,
    /// Value and unit (`Mbps` or `Kbps`)
    pub bandwidth: Option<(f64, String)>,
    pub signal_strength_dbm: Option<f64>,
}

impl PerformanceMetrics {
    pub fn is_empty(&self) -> bool {
        self.network_latency_ms.is_none()
            && self.bandwidth.is_none()
            && self.signal_strength_dbm.is_none()
    }

    /// ` (network latency: 12.50ms) (bandwidth: 80.00Mbps)` style suffix
    pub fn summary_suffix(&self) -> String {
        let mut out = String::new();
        if let Some(ms) = self.network_latency_ms {
            out.push_str(&format!(" (network latency: {:.2}ms)", ms));
        }
        if let Some((value, unit)) = &self.bandwidth {
            out.push_str(&format!(" (bandwidth: {:.2}{})", value, unit));
        }
        if let Some(dbm) = self.signal_strength_dbm {
            out.push_str(&format!(" (signal strength: {:.2}dBm)", dbm));
        }
        out
    }
}

/// What a case said about itself
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseLogReport {
    pub statistics: Option<TestStatistics>,
    /// `name: message` of every failed or erroring test
    pub failure_details: Vec<String>,
    pub metrics: PerformanceMetrics,
}

impl CaseLogReport {
    pub fn is_empty(&self) -> bool {
        self.statistics.is_none() && self.failure_details.is_empty() && self.metrics.is_empty()
    }
}

/// Parse the self-reported summary out of a case log
pub fn parse(log: &str) -> CaseLogReport {
    let patterns = &*PATTERNS;
    CaseLogReport {
        statistics: parse_statistics(log, patterns),
        failure_details: parse_failure_details(log, patterns),
        metrics: PerformanceMetrics {
            network_latency_ms: first_number(log, patterns.latency.as_ref()),
            bandwidth: patterns.bandwidth.as_ref().and_then(|re| {
                let caps = re.captures(log)?;
                let value = caps.get(1)?.as_str().parse().ok()?;
                Some((value, caps.get(2)?.as_str().to_string()))
            }),
            signal_strength_dbm: first_number(log, patterns.signal.as_ref()),
        },
    }
}

fn parse_statistics(log: &str, patterns: &LogPatterns) -> Option<TestStatistics> {
    let caps = patterns.statistics.as_ref()?.captures(log)?;
    let number = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    Some(TestStatistics {
        total: number(1)?,
        failed: number(2)?,
        errors: number(3)?,
    })
}

fn parse_failure_details(log: &str, patterns: &LogPatterns) -> Vec<String> {
    let Some(line_re) = patterns.detail_line.as_ref() else {
        return Vec::new();
    };

    let mut details = Vec::new();
    let mut in_list = false;
    for line in log.lines() {
        if DETAIL_HEADERS.iter().any(|h| line.contains(h)) {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        match line_re.captures(line) {
            Some(caps) => {
                let name = caps.get(1).map_or("", |m| m.as_str());
                let message = caps.get(2).map_or("", |m| m.as_str());
                details.push(format!("{}: {}", name, message));
            }
            None => in_list = false,
        }
    }
    details
}

fn first_number(log: &str, re: Option<&Regex>) -> Option<f64> {
    re?.captures(log)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "\
starting suite
运行测试数: 10
失败数: 1
错误数: 1
失败的测试:
- test_login: AssertionError: expected 200
错误的测试:
- test_upload: TimeoutError
done
网络延迟: 12.5ms
带宽: 80 Mbps
信号强度: -67 dBm
";

    #[test]
    fn test_parse_full_summary() {
        let report = parse(SUMMARY);

        let stats = report.statistics.unwrap();
        assert_eq!(stats, TestStatistics { total: 10, failed: 1, errors: 1 });
        assert_eq!(stats.passed(), 8);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
        assert!(stats.has_failures());

        assert_eq!(
            report.failure_details,
            vec!["test_login: AssertionError: expected 200", "test_upload: TimeoutError"]
        );

        assert_eq!(report.metrics.network_latency_ms, Some(12.5));
        assert_eq!(report.metrics.bandwidth, Some((80.0, "Mbps".to_string())));
        assert_eq!(report.metrics.signal_strength_dbm, Some(-67.0));
    }

    #[test]
    fn test_plain_log_is_empty() {
        let report = parse("hello\nall good\n");
        assert!(report.is_empty());
    }

    #[test]
    fn test_statistics_display() {
        let stats = TestStatistics { total: 4, failed: 0, errors: 0 };
        assert_eq!(
            stats.to_string(),
            "tests: total=4, passed=4, failed=0, errors=0, success rate=100.0%"
        );
        assert_eq!(TestStatistics { total: 0, failed: 0, errors: 0 }.success_rate(), 0.0);
    }

    #[test]
    fn test_metrics_suffix() {
        let metrics = PerformanceMetrics {
            network_latency_ms: Some(3.0),
            bandwidth: Some((512.0, "Kbps".into())),
            signal_strength_dbm: None,
        };
        assert_eq!(
            metrics.summary_suffix(),
            " (network latency: 3.00ms) (bandwidth: 512.00Kbps)"
        );
    }

    #[test]
    fn test_detail_list_ends_at_first_other_line() {
        let report = parse("失败的测试:\n- a: boom\nnot a detail\n- b: ignored\n");
        assert_eq!(report.failure_details, vec!["a: boom"]);
    }
}
