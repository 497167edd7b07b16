//! Host firewall reconciliation against the desired rule set, through an
//! injectable command runner so the diff logic is testable without a real
//! netfilter stack (spec §4.5).

use std::collections::HashSet;
use std::process::Output;
use std::sync::Mutex;

use nekoproxy_common::{FirewallAction, FirewallRuleWire, Protocol};

use crate::error::FirewallError;

const CHAIN_NAME: &str = "NEKOPROXY";
const WIREGUARD_CANDIDATES: &[&str] = &["wg0", "wg1", "wg-tunnel"];
const PUBLIC_FALLBACKS: &[&str] = &["eth0", "ens3", "enp0s3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub stderr_has_exists: bool,
}

/// Abstraction over invoking host commands (`iptables`, `ip route`) so the
/// reconciliation logic can run under test with a fake runner.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutcome>;
}

pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutcome> {
        let output: Output = std::process::Command::new(program).args(args).output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(CommandOutcome {
            success: output.status.success(),
            stderr_has_exists: stderr.contains("already exists") || stderr.contains("Chain already exists"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AppliedRule {
    port: u16,
    protocol: Protocol,
    interface: String,
    action: FirewallAction,
}

pub struct FirewallReconciler {
    runner: Box<dyn CommandRunner>,
    chain_ready: Mutex<bool>,
    applied: Mutex<HashSet<AppliedRule>>,
}

impl FirewallReconciler {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self {
            runner,
            chain_ready: Mutex::new(false),
            applied: Mutex::new(HashSet::new()),
        }
    }

    /// Creates the `NEKOPROXY` chain and jump rule if absent. Idempotent:
    /// an "already exists" outcome is treated as success.
    pub fn ensure_chain(&self) -> Result<(), FirewallError> {
        {
            let ready = self.chain_ready.lock().unwrap();
            if *ready {
                return Ok(());
            }
        }

        let new_chain = self
            .runner
            .run("iptables", &["-N", CHAIN_NAME])
            .map_err(|e| FirewallError::CommandFailed(e.to_string()))?;
        if !new_chain.success && !new_chain.stderr_has_exists {
            return Err(FirewallError::CommandFailed(format!("failed to create chain {CHAIN_NAME}")));
        }

        let check_jump = self
            .runner
            .run("iptables", &["-C", "INPUT", "-j", CHAIN_NAME])
            .map_err(|e| FirewallError::CommandFailed(e.to_string()))?;
        if !check_jump.success {
            let insert_jump = self
                .runner
                .run("iptables", &["-I", "INPUT", "-j", CHAIN_NAME])
                .map_err(|e| FirewallError::CommandFailed(e.to_string()))?;
            if !insert_jump.success && !insert_jump.stderr_has_exists {
                return Err(FirewallError::CommandFailed(format!("failed to jump into chain {CHAIN_NAME}")));
            }
        }

        *self.chain_ready.lock().unwrap() = true;
        Ok(())
    }

    /// Resolves a logical interface reference to an actual device name:
    /// `wireguard` picks the first of a known candidate list, `public`
    /// picks the default-route device or a well-known fallback, anything
    /// else is used verbatim.
    pub fn resolve_interface(&self, reference: &str) -> Result<String, FirewallError> {
        match reference {
            "wireguard" => {
                for candidate in WIREGUARD_CANDIDATES {
                    let check = self
                        .runner
                        .run("ip", &["link", "show", candidate])
                        .map_err(|e| FirewallError::CommandFailed(e.to_string()))?;
                    if check.success {
                        return Ok((*candidate).to_string());
                    }
                }
                Err(FirewallError::UnresolvedInterface { reference: reference.to_string() })
            }
            "public" => {
                let route = self
                    .runner
                    .run("ip", &["route", "show", "default"])
                    .map_err(|e| FirewallError::CommandFailed(e.to_string()))?;
                if route.success {
                    for candidate in PUBLIC_FALLBACKS {
                        let check = self
                            .runner
                            .run("ip", &["link", "show", candidate])
                            .map_err(|e| FirewallError::CommandFailed(e.to_string()))?;
                        if check.success {
                            return Ok((*candidate).to_string());
                        }
                    }
                }
                Err(FirewallError::UnresolvedInterface { reference: reference.to_string() })
            }
            literal => Ok(literal.to_string()),
        }
    }

    /// Diffs `rules` (enabled only) against the currently applied set and
    /// adds/removes the delta. A rule is keyed by (port, protocol,
    /// resolved interface, action) — identical rules across agents do not
    /// churn the host firewall. A rule whose interface cannot be resolved is
    /// dropped (logged at warning) rather than aborting the whole sync; a
    /// failed add/remove is logged at warning and left for the next sync to
    /// retry, rather than aborting before rules later in the same batch are
    /// applied.
    pub fn sync(&self, rules: &[FirewallRuleWire]) -> Result<(), FirewallError> {
        self.ensure_chain()?;

        let mut desired = HashSet::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            let interface = match self.resolve_interface(&rule.interface) {
                Ok(interface) => interface,
                Err(err) => {
                    tracing::warn!(port = rule.port, reference = %rule.interface, error = %err, "dropping firewall rule with unresolvable interface");
                    continue;
                }
            };
            desired.insert(AppliedRule {
                port: rule.port,
                protocol: rule.protocol,
                interface,
                action: rule.action,
            });
        }

        let mut applied = self.applied.lock().unwrap();
        let mut next_applied = applied.clone();

        let to_remove: Vec<AppliedRule> = applied.difference(&desired).cloned().collect();
        for rule in &to_remove {
            if self.apply_rule(rule, false) {
                next_applied.remove(rule);
            } else {
                tracing::warn!(port = rule.port, interface = %rule.interface, "failed to remove firewall rule, will retry next sync");
            }
        }

        let to_add: Vec<AppliedRule> = desired.difference(&applied).cloned().collect();
        for rule in &to_add {
            if self.apply_rule(rule, true) {
                next_applied.insert(rule.clone());
            } else {
                tracing::warn!(port = rule.port, interface = %rule.interface, "failed to add firewall rule, will retry next sync");
            }
        }

        *applied = next_applied;
        Ok(())
    }

    /// Issues one `iptables -A`/`-D` call for `rule`. Returns whether it
    /// succeeded; never aborts `sync`'s batch on failure.
    fn apply_rule(&self, rule: &AppliedRule, insert: bool) -> bool {
        let jump = match rule.action {
            FirewallAction::Allow => "ACCEPT",
            FirewallAction::Block => "DROP",
        };
        let flag = if insert { "-A" } else { "-D" };
        let port = rule.port.to_string();
        let protocol = rule.protocol.as_str();
        let outcome = self.runner.run(
            "iptables",
            &[flag, CHAIN_NAME, "-i", &rule.interface, "-p", protocol, "--dport", &port, "-j", jump],
        );
        match outcome {
            Ok(outcome) if outcome.success => true,
            Ok(_) => false,
            Err(err) => {
                tracing::warn!(port = rule.port, error = %err, "firewall command failed to run");
                false
            }
        }
    }

    /// Flushes the chain, removes the jump, and deletes the chain. Best
    /// effort — errors are logged by the caller and never block shutdown.
    pub fn teardown(&self) -> Result<(), FirewallError> {
        let _ = self.runner.run("iptables", &["-F", CHAIN_NAME]);
        let _ = self.runner.run("iptables", &["-D", "INPUT", "-j", CHAIN_NAME]);
        let _ = self.runner.run("iptables", &["-X", CHAIN_NAME]);
        *self.chain_ready.lock().unwrap() = false;
        self.applied.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeRunner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        existing_links: Vec<&'static str>,
        fail_everything: bool,
        fail_ports: Vec<u16>,
    }

    impl FakeRunner {
        fn new(existing_links: Vec<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                existing_links,
                fail_everything: false,
                fail_ports: Vec::new(),
            }
        }

        fn failing_ports(existing_links: Vec<&'static str>, fail_ports: Vec<u16>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                existing_links,
                fail_everything: false,
                fail_ports,
            }
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutcome> {
            self.calls.lock().unwrap().push((program.to_string(), args.iter().map(|s| s.to_string()).collect()));
            if self.fail_everything {
                return Ok(CommandOutcome { success: false, stderr_has_exists: false });
            }
            if program == "ip" && args.first() == Some(&"link") {
                let iface = args.last().copied().unwrap_or("");
                return Ok(CommandOutcome { success: self.existing_links.contains(&iface), stderr_has_exists: false });
            }
            if program == "ip" && args.first() == Some(&"route") {
                return Ok(CommandOutcome { success: true, stderr_has_exists: false });
            }
            if (args.first() == Some(&"-A") || args.first() == Some(&"-D"))
                && args.iter().any(|a| self.fail_ports.iter().any(|p| *a == p.to_string()))
            {
                return Ok(CommandOutcome { success: false, stderr_has_exists: false });
            }
            Ok(CommandOutcome { success: true, stderr_has_exists: false })
        }
    }

    fn rule(id: i64, port: u16, interface: &str, action: FirewallAction) -> FirewallRuleWire {
        FirewallRuleWire {
            id,
            port,
            protocol: Protocol::Tcp,
            interface: interface.to_string(),
            action,
            enabled: true,
            agent_id: None,
        }
    }

    #[test]
    fn resolve_interface_picks_first_existing_wireguard_candidate() {
        let runner = FakeRunner::new(vec!["wg1"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));
        assert_eq!(reconciler.resolve_interface("wireguard").unwrap(), "wg1");
    }

    #[test]
    fn resolve_interface_passes_through_literal_names() {
        let reconciler = FirewallReconciler::new(Box::new(FakeRunner::new(vec![])));
        assert_eq!(reconciler.resolve_interface("eth2").unwrap(), "eth2");
    }

    #[test]
    fn sync_adds_new_rules_and_removes_stale_ones() {
        let runner = FakeRunner::new(vec!["wg0"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));

        reconciler.sync(&[rule(1, 8080, "wireguard", FirewallAction::Allow)]).unwrap();
        assert_eq!(reconciler.applied.lock().unwrap().len(), 1);

        reconciler.sync(&[rule(2, 9090, "wireguard", FirewallAction::Block)]).unwrap();
        let applied = reconciler.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied.iter().any(|r| r.port == 9090));
    }

    #[test]
    fn sync_is_stable_across_identical_calls() {
        let runner = FakeRunner::new(vec!["wg0"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));
        let rules = vec![rule(1, 8080, "wireguard", FirewallAction::Allow)];

        reconciler.sync(&rules).unwrap();
        reconciler.sync(&rules).unwrap();
        assert_eq!(reconciler.applied.lock().unwrap().len(), 1);
    }

    #[test]
    fn disabled_rules_are_excluded_from_desired_set() {
        let runner = FakeRunner::new(vec!["wg0"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));
        let mut r = rule(1, 8080, "wireguard", FirewallAction::Allow);
        r.enabled = false;

        reconciler.sync(&[r]).unwrap();
        assert_eq!(reconciler.applied.lock().unwrap().len(), 0);
    }

    #[test]
    fn teardown_clears_applied_state() {
        let runner = FakeRunner::new(vec!["wg0"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));
        reconciler.sync(&[rule(1, 8080, "wireguard", FirewallAction::Allow)]).unwrap();
        reconciler.teardown().unwrap();
        assert_eq!(reconciler.applied.lock().unwrap().len(), 0);
        assert!(!*reconciler.chain_ready.lock().unwrap());
    }

    #[test]
    fn unresolvable_interface_drops_only_that_rule() {
        let runner = FakeRunner::new(vec!["wg0"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));

        // "wireguard" resolves fine (wg0 exists); "does-not-exist" does not
        // resolve to anything and must not abort the whole sync.
        reconciler
            .sync(&[
                rule(1, 8080, "wireguard", FirewallAction::Allow),
                rule(2, 9090, "bogus-reference-type", FirewallAction::Allow),
            ])
            .unwrap();

        let applied = reconciler.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied.iter().any(|r| r.port == 8080));
    }

    #[test]
    fn failed_add_is_not_recorded_as_applied_and_other_rules_still_apply() {
        let runner = FakeRunner::failing_ports(vec!["wg0"], vec![9090]);
        let reconciler = FirewallReconciler::new(Box::new(runner));

        reconciler
            .sync(&[
                rule(1, 8080, "wireguard", FirewallAction::Allow),
                rule(2, 9090, "wireguard", FirewallAction::Block),
            ])
            .unwrap();

        let applied = reconciler.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied.iter().any(|r| r.port == 8080));
        assert!(!applied.iter().any(|r| r.port == 9090));
    }

    #[test]
    fn failed_remove_keeps_rule_in_applied_for_retry() {
        let runner = FakeRunner::new(vec!["wg0"]);
        let reconciler = FirewallReconciler::new(Box::new(runner));
        reconciler.sync(&[rule(1, 8080, "wireguard", FirewallAction::Allow)]).unwrap();

        // Swap in a runner that fails every `-D` so the removal attempt
        // fails; the rule must stay in `applied` rather than being dropped
        // on a failed removal.
        let failing = FakeRunner::failing_ports(vec!["wg0"], vec![8080]);
        let reconciler = FirewallReconciler { runner: Box::new(failing), ..reconciler };
        reconciler.sync(&[]).unwrap();

        let applied = reconciler.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied.iter().any(|r| r.port == 8080));
    }
}
