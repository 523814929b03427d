//! Prompt templates for agent turns.

use ai_client::{GenerationRequest, Message};

use crate::state::Conversation;
use crate::world::{Agent, AgentId, WorldConfig};

/// Recalled turns are cut to this many per conversation, newest kept.
const RECALL_TURNS_PER_CONVERSATION: usize = 12;

/// Build the request for `speaker`'s next turn in `conversation`.
///
/// The speaker's own earlier turns become assistant messages and everyone
/// else's become user messages prefixed with the speaker's name, so the model
/// always answers in the speaker's voice. Failed turns are left out.
pub fn agent_turn(
    speaker: &Agent,
    config: &WorldConfig,
    conversation: &Conversation,
    recalled: &[&Conversation],
) -> GenerationRequest {
    let system = agent_system(speaker, config, conversation, recalled);

    let mut messages: Vec<Message> = conversation
        .turns()
        .iter()
        .filter(|t| !t.failed)
        .map(|t| {
            if t.speaker_id == speaker.id {
                Message::assistant(&t.message)
            } else {
                Message::user(format!(
                    "{}: {}",
                    config.display_name(&t.speaker_id),
                    t.message
                ))
            }
        })
        .collect();

    if messages.is_empty() {
        messages.push(Message::user(opening_line(speaker, config, conversation)));
    } else if messages.last().is_some_and(|m| m.role == ai_client::MessageRole::Assistant) {
        // Speaking twice in a row (solo conversations, or a failed partner turn).
        messages.push(Message::user("(Continue.)"));
    }

    GenerationRequest::new(messages).system(system)
}

fn agent_system(
    speaker: &Agent,
    config: &WorldConfig,
    conversation: &Conversation,
    recalled: &[&Conversation],
) -> String {
    let others: Vec<&str> = conversation
        .participants()
        .iter()
        .filter(|id| **id != speaker.id)
        .map(|id| config.display_name(id))
        .collect();
    let company = if others.is_empty() {
        "You are alone with your thoughts.".to_string()
    } else {
        format!("You are talking with {}.", others.join(", "))
    };

    let rules = &config.world_rules;
    let setting = rules
        .setting
        .as_deref()
        .map(|s| format!("\nSETTING: {s}"))
        .unwrap_or_default();
    let rules_list = if rules.rules.is_empty() {
        String::new()
    } else {
        let list = rules
            .rules
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nWORLD RULES:\n{list}")
    };
    let extra = if rules.extra.is_empty() {
        String::new()
    } else {
        let list = rules
            .extra
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("- {k}: {s}"),
                other => format!("- {k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nWORLD DETAILS:\n{list}")
    };

    let memory = memory_section(&speaker.id, config, recalled);

    format!(
        r#"You are {name}, a character in "{world}". It is day {day} of {max_days}.
{identity}
{setting}{rules_list}{extra}{memory}

{company}
Reply with one short in-character utterance (1-3 sentences). Do not narrate other characters or prefix your name."#,
        name = speaker.name,
        world = config.name,
        day = conversation.day(),
        max_days = config.max_days,
        identity = speaker.identity_script.trim(),
    )
}

fn memory_section(me: &AgentId, config: &WorldConfig, recalled: &[&Conversation]) -> String {
    if recalled.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nWHAT YOU REMEMBER FROM EARLIER DAYS:");
    for conv in recalled {
        let with: Vec<&str> = conv
            .participants()
            .iter()
            .filter(|id| *id != me)
            .map(|id| config.display_name(id))
            .collect();
        let who = if with.is_empty() {
            "alone".to_string()
        } else {
            format!("with {}", with.join(", "))
        };
        out.push_str(&format!("\nDay {}, {who}:", conv.day()));

        let spoken: Vec<_> = conv.turns().iter().filter(|t| !t.failed).collect();
        let skip = spoken.len().saturating_sub(RECALL_TURNS_PER_CONVERSATION);
        for turn in spoken.into_iter().skip(skip) {
            let name = if &turn.speaker_id == me {
                "You"
            } else {
                config.display_name(&turn.speaker_id)
            };
            out.push_str(&format!("\n  {name}: {}", turn.message));
        }
    }
    out
}

fn opening_line(speaker: &Agent, config: &WorldConfig, conversation: &Conversation) -> String {
    let others: Vec<&str> = conversation
        .participants()
        .iter()
        .filter(|id| **id != speaker.id)
        .map(|id| config.display_name(id))
        .collect();
    if others.is_empty() {
        format!("Day {} begins. Say what is on your mind.", conversation.day())
    } else {
        format!(
            "Day {} begins. You meet {}. Open the conversation.",
            conversation.day(),
            others.join(" and ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Turn;
    use crate::testing::world;
    use ai_client::MessageRole;

    fn conversation(day: u32) -> Conversation {
        Conversation::new(day, vec!["a".into(), "b".into()])
    }

    #[test]
    fn first_turn_gets_an_opening_prompt() {
        let config = world(&["a", "b"], 2, 2);
        let request = agent_turn(&config.agents[0], &config, &conversation(1), &[]);

        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, MessageRole::User);
        assert!(request.messages[0].content.contains("You meet B"));
        let system = request.system.unwrap();
        assert!(system.starts_with("You are A, a character in \"Test World\". It is day 1 of 2."));
        assert!(system.contains("You are a."));
        assert!(!system.contains("REMEMBER"));
    }

    #[test]
    fn turns_are_seen_from_the_speakers_side() {
        let config = world(&["a", "b"], 1, 4);
        let mut conv = conversation(1);
        conv.push(Turn::spoken("a".into(), "Morning.".into()));
        conv.push(Turn::spoken("b".into(), "Is it?".into()));
        conv.push(Turn::failed("a".into()));

        let request = agent_turn(&config.agents[1], &config, &conv, &[]);
        let roles: Vec<MessageRole> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]);
        assert_eq!(request.messages[0].content, "A: Morning.");
        assert_eq!(request.messages[2].content, "(Continue.)");
    }

    #[test]
    fn recalled_conversations_enter_the_system_prompt() {
        let config = world(&["a", "b", "c"], 3, 2);
        let mut earlier = Conversation::new(1, vec!["a".into(), "c".into()]);
        earlier.push(Turn::spoken("c".into(), "The tide is late.".into()));
        earlier.push(Turn::failed("a".into()));

        let request = agent_turn(&config.agents[0], &config, &conversation(2), &[&earlier]);
        let system = request.system.unwrap();
        assert!(system.contains("WHAT YOU REMEMBER FROM EARLIER DAYS:"));
        assert!(system.contains("Day 1, with C:"));
        assert!(system.contains("C: The tide is late."));
    }

    #[test]
    fn world_rules_are_listed() {
        let mut config = world(&["a", "b"], 1, 1);
        config.world_rules.setting = Some("A rainy port".into());
        config.world_rules.rules = vec!["No magic".into()];
        config
            .world_rules
            .extra
            .insert("currency".into(), serde_json::json!("shells"));

        let system = agent_turn(&config.agents[0], &config, &conversation(1), &[])
            .system
            .unwrap();
        assert!(system.contains("SETTING: A rainy port"));
        assert!(system.contains("- No magic"));
        assert!(system.contains("- currency: shells"));
    }
}
