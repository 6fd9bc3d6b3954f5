use crate::error::CompletionError;
use crate::service::{CompletionService, Turn};

const TAIL_CHARS: usize = 100;
const ELLIPSES: [&str; 2] = ["...", "…"];
const SENTINEL_WORDS: [&str; 4] = ["TO BE CONTINUED", "CONTINUE", "TERMINATE", "END"];
const CONTINUE_PROMPT: &str = "Please continue your previous answer from where it stopped.";

/// Whether a response looks cut off: its trimmed, upper-cased last 100
/// characters end in an ellipsis or a sentinel word.
pub fn seems_incomplete(text: &str) -> bool {
    let skip = text.chars().count().saturating_sub(TAIL_CHARS);
    let tail: String = text.chars().skip(skip).collect();
    let tail = tail.trim().to_uppercase();
    if tail.is_empty() {
        return false;
    }
    if ELLIPSES.iter().any(|e| tail.ends_with(e)) {
        return true;
    }
    SENTINEL_WORDS.iter().any(|word| {
        tail.strip_suffix(word).is_some_and(|before| {
            !before
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
        })
    })
}

#[derive(Debug)]
pub struct Continued {
    /// Trimmed fragments joined by newlines.
    pub text: String,
    pub responses: usize,
    /// The failure that ended the run early, if any.
    pub stopped_by: Option<CompletionError>,
}

/// Drive one logical request across up to `max_steps` calls, asking the
/// model to continue while its answer looks unfinished. Service failures
/// end the run; whatever was collected is returned.
pub async fn complete_with_continuation(
    service: &dyn CompletionService,
    turns: Vec<Turn>,
    max_steps: usize,
) -> Continued {
    let mut turns = turns;
    let mut fragments: Vec<String> = Vec::new();
    let mut stopped_by = None;

    for step in 0..max_steps.max(1) {
        let text = match service.complete(&turns).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("continuation step {} failed: {e}", step + 1);
                stopped_by = Some(e);
                break;
            }
        };
        fragments.push(text.trim().to_string());
        if !seems_incomplete(&text) {
            break;
        }
        log::debug!("response looks unfinished after step {}, continuing", step + 1);
        turns.push(Turn::assistant(text));
        turns.push(Turn::user(CONTINUE_PROMPT));
    }

    Continued {
        text: fragments.join("\n").trim().to_string(),
        responses: fragments.len(),
        stopped_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Role, ScriptedCompletion};
    use pretty_assertions::assert_eq;

    #[test]
    fn sentinels_are_detected() {
        assert!(seems_incomplete("The modules are..."));
        assert!(seems_incomplete("and then…"));
        assert!(seems_incomplete("part one, to be continued  "));
        assert!(seems_incomplete("I will CONTINUE"));
        assert!(seems_incomplete("the end"));
        assert!(seems_incomplete("END"));
        assert!(seems_incomplete("TERMINATE\n"));
    }

    #[test]
    fn words_ending_in_a_sentinel_are_not() {
        assert!(!seems_incomplete("talks to the backend"));
        assert!(!seems_incomplete("use append"));
        assert!(!seems_incomplete("{\"done\": true}"));
        assert!(!seems_incomplete(""));
    }

    #[test]
    fn only_the_tail_is_inspected() {
        let text = format!("wait...{}", "x".repeat(200));
        assert!(!seems_incomplete(&text));
    }

    #[tokio::test]
    async fn continues_until_complete() {
        let service = ScriptedCompletion::new()
            .reply("first half ...")
            .reply("  second half  ");
        let out = complete_with_continuation(&service, vec![Turn::user("go")], 3).await;
        assert_eq!(out.text, "first half ...\nsecond half");
        assert_eq!(out.responses, 2);
        assert!(out.stopped_by.is_none());

        let second = &service.requests()[1];
        let roles: Vec<Role> = second.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(second[1].content, "first half ...");
    }

    #[tokio::test]
    async fn never_exceeds_the_step_bound() {
        let service = ScriptedCompletion::new()
            .reply("a...")
            .reply("b...")
            .reply("c...")
            .reply("d...");
        let out = complete_with_continuation(&service, vec![Turn::user("go")], 3).await;
        assert_eq!(out.responses, 3);
        assert_eq!(service.requests().len(), 3);
        assert_eq!(service.remaining(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_what_was_collected() {
        let service = ScriptedCompletion::new().reply("partial ...").fail("timeout");
        let out = complete_with_continuation(&service, vec![Turn::user("go")], 5).await;
        assert_eq!(out.text, "partial ...");
        assert!(matches!(out.stopped_by, Some(CompletionError::Transport(_))));
    }

    #[tokio::test]
    async fn immediate_failure_returns_empty_text() {
        let service = ScriptedCompletion::new().fail("down");
        let out = complete_with_continuation(&service, vec![Turn::user("go")], 3).await;
        assert_eq!(out.text, "");
        assert_eq!(out.responses, 0);
    }
}
