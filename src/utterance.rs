//! Utterance assembly and dispatch gating
//!
//! Accumulates finalized transcript fragments into a pending utterance and
//! decides, at an utterance boundary, whether the text should be dispatched
//! or treated as an exit command.

/// Phrases that end the conversation when spoken as a complete utterance.
///
/// Matching is exact (trimmed, lowercased), never substring, so an exit word
/// inside a longer sentence does not end the session.
pub const EXIT_PHRASES: &[&str] = &["stop", "exit voice mode", "stop listening"];

/// Transcript text accumulated during one listening span
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingUtterance {
    finalized: String,
    interim: String,
}

impl PendingUtterance {
    /// Create an empty utterance
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized fragment, separated by a single space
    ///
    /// Finalized text only ever grows within a listening span. Any pending
    /// interim text is superseded by the final fragment and cleared.
    pub fn push_final(&mut self, text: &str) {
        let fragment = text.trim();
        if fragment.is_empty() {
            self.interim.clear();
            return;
        }

        if !self.finalized.is_empty() {
            self.finalized.push(' ');
        }
        self.finalized.push_str(fragment);
        self.interim.clear();
    }

    /// Replace the interim (display-only) text
    pub fn set_interim(&mut self, text: &str) {
        self.interim.clear();
        self.interim.push_str(text);
    }

    /// The finalized text accumulated so far
    #[must_use]
    pub fn finalized(&self) -> &str {
        &self.finalized
    }

    /// The latest interim text
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Whether any finalized text has accumulated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finalized.trim().is_empty()
    }

    /// Reset both finalized and interim text
    pub fn clear(&mut self) {
        self.finalized.clear();
        self.interim.clear();
    }
}

/// Outcome of gating an utterance at a boundary event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchDecision {
    /// The utterance should be sent to the conversation backend
    pub should_send: bool,
    /// The utterance is a recognized exit command
    pub is_exit_command: bool,
}

/// Gate an assembled utterance at a boundary event
///
/// Interim text never contributes: only finalized text is considered.
#[must_use]
pub fn decide(utterance: &PendingUtterance) -> DispatchDecision {
    let is_exit_command = is_exit_command(utterance.finalized());
    DispatchDecision {
        should_send: !is_exit_command && !utterance.is_empty(),
        is_exit_command,
    }
}

/// Exact-match test against the exit phrase set
fn is_exit_command(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    EXIT_PHRASES.iter().any(|phrase| *phrase == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_fragments_join_with_space() {
        let mut utterance = PendingUtterance::new();
        utterance.push_final("turn on");
        utterance.push_final("dark mode");
        assert_eq!(utterance.finalized(), "turn on dark mode");
    }

    #[test]
    fn test_final_clears_interim() {
        let mut utterance = PendingUtterance::new();
        utterance.set_interim("turn o");
        assert_eq!(utterance.interim(), "turn o");

        utterance.push_final("turn on dark mode");
        assert_eq!(utterance.interim(), "");
    }

    #[test]
    fn test_interim_replaces_not_appends() {
        let mut utterance = PendingUtterance::new();
        utterance.set_interim("tur");
        utterance.set_interim("turn on");
        assert_eq!(utterance.interim(), "turn on");
        assert_eq!(utterance.finalized(), "");
    }

    #[test]
    fn test_empty_final_fragment_ignored() {
        let mut utterance = PendingUtterance::new();
        utterance.push_final("   ");
        assert_eq!(utterance.finalized(), "");
        assert!(utterance.is_empty());
    }

    #[test]
    fn test_exit_is_exact_not_substring() {
        let mut utterance = PendingUtterance::new();
        utterance.push_final("please stop now");

        let decision = decide(&utterance);
        assert!(!decision.is_exit_command);
        assert!(decision.should_send);
    }

    #[test]
    fn test_exit_matches_after_trim_and_lowercase() {
        let mut utterance = PendingUtterance::new();
        utterance.push_final("Stop");

        let decision = decide(&utterance);
        assert!(decision.is_exit_command);
        assert!(!decision.should_send);
    }

    #[test]
    fn test_multi_word_exit_phrase() {
        let mut utterance = PendingUtterance::new();
        utterance.push_final("Exit Voice Mode");

        let decision = decide(&utterance);
        assert!(decision.is_exit_command);
    }

    #[test]
    fn test_empty_utterance_does_not_send() {
        let utterance = PendingUtterance::new();
        let decision = decide(&utterance);
        assert!(!decision.should_send);
        assert!(!decision.is_exit_command);
    }

    #[test]
    fn test_interim_never_contributes_to_decision() {
        let mut utterance = PendingUtterance::new();
        utterance.set_interim("turn on dark mode");

        let decision = decide(&utterance);
        assert!(!decision.should_send);
    }
}
