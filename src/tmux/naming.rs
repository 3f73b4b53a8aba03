//! Session naming conventions.
//!
//! Creation always uses the current form `az-<beadId>`; discovery must also
//! recognize the legacy form `<beadId>-az` so sessions started by an older
//! process are not mistaken for crashed ones.

/// The tmux session name azedarach creates for a bead. This is the only
/// form ever passed to `TmuxClient::new_session`.
pub fn session_name_for_bead(bead_id: &str) -> String {
    format!("az-{}", sanitize_session_name(bead_id))
}

/// The legacy session name form, recognized only for discovery.
pub fn legacy_session_name(bead_id: &str) -> String {
    format!("{}-az", sanitize_session_name(bead_id))
}

/// tmux session names may not contain `.` or `:`; replace anything tmux
/// would choke on with `-`.
pub fn sanitize_session_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '.' || c == ':' { '-' } else { c })
        .collect()
}

/// Recover the bead id a live tmux session name corresponds to, accepting
/// both the current and legacy naming forms. Returns `None` for session
/// names azedarach did not create (e.g. a developer's own tmux sessions).
pub fn bead_id_for_session(session_name: &str) -> Option<String> {
    if let Some(id) = session_name.strip_prefix("az-") {
        return Some(id.to_string());
    }
    if let Some(id) = session_name.strip_suffix("-az") {
        return Some(id.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_current_form() {
        assert_eq!(session_name_for_bead("az-1"), "az-az-1");
    }

    #[test]
    fn recognizes_both_forms() {
        assert_eq!(bead_id_for_session("az-az-1"), Some("az-1".to_string()));
        assert_eq!(bead_id_for_session("az-1-az"), Some("az-1".to_string()));
        assert_eq!(bead_id_for_session("some-other-session"), None);
    }

    #[test]
    fn sanitizes_dots_and_colons() {
        assert_eq!(sanitize_session_name("a.b:c"), "a-b-c");
    }
}
