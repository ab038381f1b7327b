use crate::models::{ConversationTurn, Role};

/// Trims history to a total-character budget, evicting oldest turns first.
/// The most recent turn is always kept, even when it alone exceeds the
/// budget.
pub fn truncate_turns(turns: &[ConversationTurn], max_chars: usize) -> &[ConversationTurn] {
    if turns.is_empty() {
        return turns;
    }

    let mut used = 0usize;
    let mut cut = turns.len();

    for (index, turn) in turns.iter().enumerate().rev() {
        used += turn.content.chars().count();
        if used > max_chars && index + 1 < turns.len() {
            break;
        }
        cut = index;
        if used > max_chars {
            break;
        }
    }

    &turns[cut..]
}

/// Renders turns as "User:"/"Assistant:" lines for the grounding prompt.
/// Blank turns are skipped.
pub fn render_turns(turns: &[ConversationTurn]) -> String {
    let mut lines = Vec::new();

    for turn in turns {
        let content = turn.content.trim();
        if content.is_empty() {
            continue;
        }
        let prefix = match turn.role {
            Role::User => "User:",
            Role::Assistant => "Assistant:",
            Role::System => "System:",
        };
        lines.push(format!("{prefix} {content}"));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, content: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn oldest_turns_are_evicted_first() {
        let turns = vec![
            turn(Role::User, "aaaaa"),
            turn(Role::Assistant, "bbbbb"),
            turn(Role::User, "ccccc"),
        ];
        let kept = truncate_turns(&turns, 10);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].content, "bbbbb");
        assert_eq!(kept[1].content, "ccccc");
    }

    #[test]
    fn most_recent_turn_survives_even_over_budget() {
        let turns = vec![
            turn(Role::User, "short"),
            turn(Role::Assistant, &"x".repeat(500)),
        ];
        let kept = truncate_turns(&turns, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content.len(), 500);
    }

    #[test]
    fn everything_fits_under_a_generous_budget() {
        let turns = vec![turn(Role::User, "one"), turn(Role::Assistant, "two")];
        assert_eq!(truncate_turns(&turns, 1_000).len(), 2);
    }

    #[test]
    fn rendering_alternates_role_prefixes_and_skips_blanks() {
        let turns = vec![
            turn(Role::User, "How do I reset the controller?"),
            turn(Role::Assistant, "Hold the reset button for five seconds."),
            turn(Role::User, "   "),
        ];
        let rendered = render_turns(&turns);
        assert_eq!(
            rendered,
            "User: How do I reset the controller?\nAssistant: Hold the reset button for five seconds."
        );
    }
}
