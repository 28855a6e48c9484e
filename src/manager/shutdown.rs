//! Shutdown escalation for running domains.
//!
//! Ask the guest to power off, poll until it does or the timeout runs out,
//! then destroy the domain. All waiting goes through the injected [`Clock`].

use crate::clock::{elapsed_between, Clock};
use crate::config::ShutdownConfig;
use crate::error::{Error, Result};
use crate::virt::Domain;
use std::time::Duration;

/// How a domain came to be stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// It was not running to begin with.
    AlreadyStopped,
    /// The guest powered off on request.
    Graceful,
    /// The domain was destroyed after the timeout.
    Forced,
}

/// Polling and termination cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Time between state polls.
    pub poll_interval: Duration,
    /// Destroy attempts before giving up.
    pub terminate_retries: u32,
    /// Pause between failed destroy attempts.
    pub terminate_retry_interval: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

impl From<&ShutdownConfig> for ShutdownPolicy {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            terminate_retries: config.terminate_retries.max(1),
            terminate_retry_interval: config.terminate_retry_interval,
        }
    }
}

impl ShutdownPolicy {
    /// Stop `domain`, waiting at most `timeout` for the guest before
    /// destroying it.
    pub fn stop(&self, domain: &dyn Domain, timeout: Duration, clock: &dyn Clock) -> Result<StopOutcome> {
        let name = domain.name().to_string();
        if observed_stopped(domain) {
            return Ok(StopOutcome::AlreadyStopped);
        }

        tracing::info!(domain = %name, timeout_secs = timeout.as_secs(), "requesting guest shutdown");
        if let Err(e) = domain.shutdown() {
            tracing::warn!(domain = %name, error = %e, "shutdown request failed");
        }

        let started = clock.now();
        loop {
            let elapsed = elapsed_between(started, clock.now());
            if elapsed >= timeout {
                break;
            }
            clock.sleep(self.poll_interval.min(timeout - elapsed));

            if observed_stopped(domain) {
                tracing::info!(domain = %name, "guest shut down");
                return Ok(StopOutcome::Graceful);
            }
            if elapsed_between(started, clock.now()) < timeout {
                tracing::debug!(domain = %name, "guest still running, repeating shutdown request");
                if let Err(e) = domain.shutdown() {
                    tracing::warn!(domain = %name, error = %e, "shutdown request failed");
                }
            }
        }

        tracing::warn!(domain = %name, "shutdown timed out, destroying domain");
        self.terminate(domain, clock)
    }

    fn terminate(&self, domain: &dyn Domain, clock: &dyn Clock) -> Result<StopOutcome> {
        let name = domain.name();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match domain.destroy() {
                Ok(()) => {
                    if observed_stopped(domain) {
                        return Ok(StopOutcome::Forced);
                    }
                    tracing::warn!(domain = %name, attempt, "domain not confirmed stopped after destroy");
                }
                Err(e) => {
                    // The guest may have powered off between the last poll and now.
                    if observed_stopped(domain) {
                        return Ok(StopOutcome::Forced);
                    }
                    tracing::warn!(domain = %name, attempt, error = %e, "destroy failed");
                }
            }

            if attempt >= self.terminate_retries {
                return Err(Error::hypervisor(format!(
                    "domain {} still running after {} destroy attempts",
                    name, attempt
                )));
            }
            clock.sleep(self.terminate_retry_interval);
        }
    }
}

/// Whether the domain is known to be stopped.
///
/// A domain that no longer exists counts as stopped. Any other query error
/// counts as still running so the caller keeps waiting or escalating.
fn observed_stopped(domain: &dyn Domain) -> bool {
    match domain.state() {
        Ok(state) => state.is_stopped(),
        Err(e) if e.is_not_found() => true,
        Err(e) => {
            tracing::warn!(domain = %domain.name(), error = %e, "domain state query failed");
            false
        }
    }
}
