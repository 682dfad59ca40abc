//! Allowlist gate for model-proposed commands.
//!
//! A pure function over one shape: normalize the raw argument, then decide.
//! The gate never executes anything; it only classifies.

/// Trim whitespace and strip at most one leading slash, then trim again.
/// `"/give @s diamond"` and `"give @s diamond"` gate identically.
pub fn normalize_command(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_prefix('/').unwrap_or(trimmed);
    stripped.trim().to_string()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Carries the normalized command ready for execution.
    Allow(String),
    RejectedEmpty,
    /// Carries the normalized command that failed the prefix check.
    RejectedDenied(String),
}

/// Gate one proposed command against the configured allowlist.
///
/// An empty allowlist allows everything; otherwise the normalized command
/// must start with at least one configured prefix (case-sensitive, plain
/// string prefix).
pub fn gate_command(raw: Option<&str>, allowlist: &[String]) -> GateDecision {
    let normalized = raw.map(normalize_command).unwrap_or_default();
    if normalized.is_empty() {
        return GateDecision::RejectedEmpty;
    }

    let allowed = allowlist.is_empty()
        || allowlist.iter().any(|prefix| normalized.starts_with(prefix.as_str()));
    if allowed {
        GateDecision::Allow(normalized)
    } else {
        GateDecision::RejectedDenied(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::{gate_command, normalize_command, GateDecision};

    fn allowlist(prefixes: &[&str]) -> Vec<String> {
        prefixes.iter().map(|prefix| prefix.to_string()).collect()
    }

    #[test]
    fn strips_exactly_one_leading_slash() {
        assert_eq!(normalize_command("/give @s diamond"), "give @s diamond");
        assert_eq!(normalize_command("give @s diamond"), "give @s diamond");
        assert_eq!(normalize_command("  / say hi  "), "say hi");
        // A second slash is part of the command, not decoration.
        assert_eq!(normalize_command("//wand"), "/wand");
    }

    #[test]
    fn empty_allowlist_allows_anything() {
        assert_eq!(
            gate_command(Some("kill @s"), &[]),
            GateDecision::Allow("kill @s".to_string())
        );
    }

    #[test]
    fn prefix_match_allows_and_everything_else_is_denied() {
        let list = allowlist(&["say", "time set"]);

        assert_eq!(gate_command(Some("say hi"), &list), GateDecision::Allow("say hi".to_string()));
        assert_eq!(
            gate_command(Some("time set day"), &list),
            GateDecision::Allow("time set day".to_string())
        );
        assert_eq!(
            gate_command(Some("kill @s"), &list),
            GateDecision::RejectedDenied("kill @s".to_string())
        );
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        let list = allowlist(&["say"]);
        assert_eq!(
            gate_command(Some("Say hi"), &list),
            GateDecision::RejectedDenied("Say hi".to_string())
        );
    }

    #[test]
    fn normalization_happens_before_the_prefix_check() {
        let list = allowlist(&["give"]);
        assert_eq!(
            gate_command(Some("/give @s diamond"), &list),
            GateDecision::Allow("give @s diamond".to_string())
        );
    }

    #[test]
    fn missing_or_blank_commands_are_rejected_as_empty() {
        assert_eq!(gate_command(None, &[]), GateDecision::RejectedEmpty);
        assert_eq!(gate_command(Some(""), &[]), GateDecision::RejectedEmpty);
        assert_eq!(gate_command(Some("   "), &[]), GateDecision::RejectedEmpty);
        assert_eq!(gate_command(Some(" / "), &[]), GateDecision::RejectedEmpty);
    }
}
