//! Standard subject patterns for fleet commands.

/// Subject domain for per-agent commands.
pub const AGENT_DOMAIN: &str = "agent";

/// Subject domain for worker liveness probes.
pub const PING_DOMAIN: &str = "ping";

/// Standard subject patterns for agent communication.
pub struct SubjectPatterns;

impl SubjectPatterns {
    /// Command addressed to one agent: `<domain>.<command>.<agent_id>`.
    #[must_use]
    pub fn command(domain: &str, command: &str, agent_id: &str) -> String {
        format!("{domain}.{command}.{agent_id}")
    }

    /// Every agent for one command (wildcard), used for stream subjects.
    #[must_use]
    pub fn all_agents(domain: &str, command: &str) -> String {
        format!("{domain}.{command}.>")
    }

    /// Liveness probe subject for a companion worker.
    #[must_use]
    pub fn ping(worker: &str) -> String {
        format!("{PING_DOMAIN}.{worker}")
    }

    /// Whether `subject` is captured by `pattern`.
    ///
    /// `*` matches exactly one token, `>` matches one or more trailing tokens.
    #[must_use]
    pub fn matches(pattern: &str, subject: &str) -> bool {
        let mut subject_tokens = subject.split('.');

        for token in pattern.split('.') {
            match token {
                ">" => return subject_tokens.next().is_some(),
                "*" => {
                    if subject_tokens.next().is_none() {
                        return false;
                    }
                }
                literal => {
                    if subject_tokens.next() != Some(literal) {
                        return false;
                    }
                }
            }
        }

        subject_tokens.next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_subject() {
        assert_eq!(
            SubjectPatterns::command(AGENT_DOMAIN, "enable", "a1"),
            "agent.enable.a1"
        );
        assert_eq!(SubjectPatterns::ping("agentworker"), "ping.agentworker");
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(SubjectPatterns::matches("agent.enable.>", "agent.enable.a1"));
        assert!(SubjectPatterns::matches("agent.*.a1", "agent.disable.a1"));
        assert!(SubjectPatterns::matches("agent.enable.a1", "agent.enable.a1"));

        assert!(!SubjectPatterns::matches("agent.enable.>", "agent.enable"));
        assert!(!SubjectPatterns::matches("agent.enable.>", "agent.disable.a1"));
        assert!(!SubjectPatterns::matches("agent.*", "agent.enable.a1"));
        assert!(!SubjectPatterns::matches("agent.enable.a1", "agent.enable"));
    }
}
