//! Maintenance-mode gate.

/// Path prefix that stays reachable during maintenance.
pub const EXEMPT_PREFIX: &str = "/api/auth";

/// Health-check path that stays reachable during maintenance.
pub const HEALTH_PATH: &str = "/healthz";

/// Whether a request may continue past the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Continue to the next stage.
    Pass,
    /// Answer 503 immediately.
    Reject,
}

/// Takes the service out of normal operation for all but a small exempt set.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceGate {
    enabled: bool,
}

impl MaintenanceGate {
    /// Create a gate; a disabled gate passes everything.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// True when maintenance mode is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide for a request path.
    pub fn check(&self, path: &str) -> GateDecision {
        if !self.enabled || is_exempt(path) {
            GateDecision::Pass
        } else {
            GateDecision::Reject
        }
    }
}

/// Paths served even in maintenance mode. `/` is not one of them.
pub fn is_exempt(path: &str) -> bool {
    path.starts_with(EXEMPT_PREFIX) || path == HEALTH_PATH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_gate_is_inert() {
        let gate = MaintenanceGate::new(false);
        for path in ["/", "/healthz", "/api/apv/anything", "/api/upload/x"] {
            assert_eq!(gate.check(path), GateDecision::Pass);
        }
    }

    #[test]
    fn enabled_gate_exempts_auth_and_health() {
        let gate = MaintenanceGate::new(true);

        assert_eq!(gate.check("/healthz"), GateDecision::Pass);
        assert_eq!(gate.check("/api/auth"), GateDecision::Pass);
        assert_eq!(gate.check("/api/auth/login"), GateDecision::Pass);
    }

    #[test]
    fn enabled_gate_rejects_everything_else() {
        let gate = MaintenanceGate::new(true);

        assert_eq!(gate.check("/"), GateDecision::Reject);
        assert_eq!(gate.check("/api/apv/anything"), GateDecision::Reject);
        assert_eq!(gate.check("/api/upload"), GateDecision::Reject);
        assert_eq!(gate.check("/healthz/extra"), GateDecision::Reject);
        assert_eq!(gate.check("/api"), GateDecision::Reject);
    }
}
