//! Host load-average admission gate.
//!
//! Blocks callers while the host's 1-minute load average exceeds
//! `load.max_load`, re-checking every `load.check_interval_seconds`. Load
//! gating is advisory: on a host where the load average cannot be read
//! (anything without a `/proc/loadavg`), the gate always returns
//! immediately rather than failing the run.

use log::{debug, warn};
use tokio::time::Duration;

use crate::cancel::{CancelToken, Cancelled};
use crate::config::LoadConfig;

/// Blocks until the host's 1-minute load average is at or below
/// `cfg.max_load`, or returns [`Cancelled`] if `cancel` fires first.
pub async fn wait_for_load(cfg: &LoadConfig, cancel: &CancelToken) -> Result<(), Cancelled> {
    loop {
        match read_load_average() {
            None => return Ok(()),
            Some(load) if load <= cfg.max_load => return Ok(()),
            Some(load) => {
                warn!(
                    "host load {load:.2} exceeds max_load {:.2}, pausing for {}s",
                    cfg.max_load, cfg.check_interval_seconds
                );
                cancel
                    .sleep_or_cancel(Duration::from_secs(cfg.check_interval_seconds))
                    .await?;
            }
        }
    }
}

/// Reads the 1-minute load average from `/proc/loadavg`'s first field.
/// Returns `None` on any host where the file is absent or malformed.
#[cfg(target_os = "linux")]
fn read_load_average() -> Option<f64> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    parse_loadavg(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_load_average() -> Option<f64> {
    debug!("load average reading not supported on this platform; gate is a no-op");
    None
}

fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_field_of_proc_loadavg_format() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 2/1234 56789"), Some(0.52));
    }

    #[test]
    fn malformed_line_yields_none() {
        assert_eq!(parse_loadavg(""), None);
        assert_eq!(parse_loadavg("not-a-number"), None);
    }

    #[tokio::test]
    async fn gate_returns_immediately_when_under_threshold() {
        let cfg = LoadConfig {
            max_load: f64::MAX,
            check_interval_seconds: 9999,
        };
        let cancel = CancelToken::new();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            wait_for_load(&cfg, &cancel),
        )
        .await
        .expect("should return promptly");
        assert!(result.is_ok());
    }
}
