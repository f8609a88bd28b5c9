//! Prompt text for every AI feature

use crate::models::Message;

pub const THERAPIST_SYSTEM: &str = "You are a supportive AI couples therapist.";

pub const VOICE_SYSTEM: &str =
    "You are a conversation moderator helping partners speak respectfully.";

pub const REFLECTION_SYSTEM: &str =
    "You are a compassionate therapist AI that helps couples reflect on their communication.";

pub const SCORE_SYSTEM: &str = "You are a therapist AI evaluating communication quality.";

/// Calm, validating reply to an issue raised during a session.
pub fn therapist(issue: &str) -> String {
    format!(
        r#"You are an emotionally intelligent AI therapist.
The couple is discussing the following issue: "{}"
- Provide a calm, validating response.
- Ask a brief open-ended question to encourage mutual understanding.
- Do not assign blame.
- Keep it under 80 words."#,
        issue
    )
}

pub fn voice_evaluation(speaker: &str, transcript: &str, context: &str) -> String {
    format!(
        r#"You are a conversation moderator helping couples communicate better.
Speaker: {}
Transcript: "{}"
Context: "{}"

Evaluate this input. Respond with only a JSON object in this exact shape:
{{"tone": "neutral", "empathy": 7, "clarity": 8, "respect": 9, "warning": false}}

- tone: one of "respectful", "hostile", "passive", "supportive", "neutral"
- empathy, clarity, respect: integers from 0 to 10
- warning: true if this should trigger a warning to the speaker"#,
        speaker, transcript, context
    )
}

pub fn reflection(messages: &[Message]) -> String {
    format!(
        r#"You are a relationship therapist AI. Given the following chat transcript between two partners, write a gentle, insightful reflection summarizing what was discussed, areas of emotional concern, and any progress made.

Transcript:
{}
Please return a 3-5 sentence therapist-style reflection."#,
        format_transcript(messages)
    )
}

pub fn score(messages: &[Message]) -> String {
    format!(
        r#"You are a therapist AI evaluating a conversation between two people. Based on the transcript below, rate their communication on a scale of 1 to 5 in these areas:

- Empathy
- Listening
- Respect
- Clarity
- Conflict Resolution

Then summarize the emotional tone in 1-2 lines.

Respond with only JSON in this exact format:

{{
  "empathy": 4,
  "listening": 5,
  "respect": 4,
  "clarity": 5,
  "conflictResolution": 4,
  "summary": "The tone was respectful and both parties were attentive to each other."
}}

Transcript:
{}"#,
        format_transcript(messages)
    )
}

/// One `speaker: text` line per message, with the server's own lines attributed to the therapist.
pub fn format_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = if m.is_ai() { "Therapist AI" } else { m.speaker_id.as_str() };
            format!("{}: {}\n", speaker, m.text)
        })
        .collect()
}

/// Gentle reminder shown to a partner who talks over the other.
pub fn interrupt_warning(partner_name: &str) -> String {
    format!("Please let {} finish their thought before responding.", partner_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_renames_ai_speaker() {
        let messages = vec![Message::new("u1", "hi"), Message::new("AI", "hello both")];
        assert_eq!(format_transcript(&messages), "u1: hi\nTherapist AI: hello both\n");
    }

    #[test]
    fn prompts_embed_their_input() {
        assert!(therapist("chores").contains("\"chores\""));
        assert!(voice_evaluation("u1", "you never listen", "").contains("Speaker: u1"));
        assert_eq!(
            interrupt_warning("Sam"),
            "Please let Sam finish their thought before responding."
        );
    }
}
