use crate::{
    profile::{LineOfBusiness, ProfileField},
    rating::{Factor, Quote},
    state::ConversationState,
};

pub const GATHER_INFO_PROMPT: &str = r#"
You are a friendly insurance quoting assistant for auto and home insurance.

Your job:
1. Find out whether the customer wants auto or home insurance.
2. Collect the details needed for a quote, one or two questions at a time.
3. As soon as the required details are known, call the matching calculation tool
   with every detail collected so far. Never invent values the customer did not give.
4. After a quote, call the tool again whenever the customer adds or changes a detail
   (accidents, violations, coverage, deductible, features of the home).

Auto quotes need: age, vehicle year, years licensed. Also useful: accidents and
violations in the last 3 years, vehicle make/model, liability limit, collision,
comprehensive, deductible.
Home quotes need: year built, square footage, dwelling coverage. Also useful:
construction type, roof type, stories, security system, fire alarm, pool.

Keep replies short and conversational. Do not quote prices yourself.
"#;

pub const KNOWLEDGE_PROMPT: &str = r#"
You are a knowledgeable insurance assistant. Answer the customer's question using
the reference material below. If the references do not cover the question, answer
from general insurance knowledge and say so. Keep it concise, then offer to continue
with their quote.
"#;

pub const EXPLAIN_PROMPT: &str = r#"
You are an insurance assistant presenting a freshly calculated quote. Explain the
monthly and annual premium, then walk through the factors that raised or lowered
the price in plain language. Use the exact dollar amounts given. Finish by asking
whether they want to adjust coverage or deductible.
"#;

pub const DEGRADED_REPLY: &str =
    "I'm sorry, I'm having trouble reaching our assistant service right now.";

/// System note describing what is known so far
pub fn profile_note(state: &ConversationState) -> String {
    let profile = serde_json::to_string(&state.profile).unwrap_or_else(|_| "{}".into());
    match state.line_of_business {
        Some(line) => {
            let missing = state.profile.missing(line.trigger_fields());
            format!(
                "Insurance type: {line}. Known details: {profile}. Still required: {}.",
                describe_fields(&missing)
            )
        }
        None => format!("Insurance type: not chosen yet. Known details: {profile}."),
    }
}

fn describe_fields(fields: &[ProfileField]) -> String {
    if fields.is_empty() {
        "nothing".to_string()
    } else {
        fields
            .iter()
            .map(|f| f.name().replace('_', " "))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Deterministic follow-up used when the model cannot be reached
pub fn missing_details_reply(line: Option<LineOfBusiness>, state: &ConversationState) -> String {
    match line {
        Some(line) => {
            let missing = state.profile.missing(line.trigger_fields());
            if missing.is_empty() {
                format!("I have everything I need for your {line} quote.")
            } else {
                format!(
                    "To prepare your {line} insurance quote I still need your {}.",
                    describe_fields(&missing)
                )
            }
        }
        None => "Are you looking for auto or home insurance?".to_string(),
    }
}

/// Reply when a tool call repeats details the current quote already reflects
pub fn unchanged_quote_reply(quote: &Quote) -> String {
    format!(
        "Those details match what I already have, so your {} quote stays at ${:.2} a month (${:.2} a year). Would you like to adjust your coverage or deductible?",
        quote.line_of_business(),
        quote.monthly_premium(),
        quote.annual_premium()
    )
}

fn label(factor: &Factor) -> String {
    let words = factor.label.replace('_', " ");
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => words,
    }
}

fn signed(amount: f64) -> String {
    if amount < 0.0 {
        format!("-${:.2}", -amount)
    } else {
        format!("+${:.2}", amount)
    }
}

/// Plain-text quote breakdown
pub fn narrate_quote(quote: &Quote) -> String {
    let mut lines = vec![
        format!("Here is your {} insurance quote:", quote.line_of_business()),
        format!("- Monthly premium: ${:.2}", quote.monthly_premium()),
        format!("- Annual premium: ${:.2}", quote.annual_premium()),
        String::new(),
        "How it adds up:".to_string(),
    ];

    for (i, factor) in quote.breakdown().iter().enumerate() {
        if factor.amount == 0.0 && factor.reason.is_none() {
            continue;
        }
        let amount = if i == 0 {
            format!("${:.2}", factor.amount)
        } else {
            signed(factor.amount)
        };
        match &factor.reason {
            Some(reason) => lines.push(format!("- {}: {} ({})", label(factor), amount, reason)),
            None => lines.push(format!("- {}: {}", label(factor), amount)),
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::{HomeRatingInput, rate_home};

    #[test]
    fn narration_lists_premiums_and_reasons() {
        let quote = rate_home(&HomeRatingInput {
            year_built: 2015,
            square_footage: 2000,
            construction_type: Some("frame".into()),
            dwelling_coverage: 300_000,
            roof_type: None,
            stories: 1,
            security_system: true,
            fire_alarm: false,
            has_pool: false,
        });
        let text = narrate_quote(&quote);

        assert!(text.contains("Monthly premium: $133.33"));
        assert!(text.contains("- Base rate: $1200.00"));
        assert!(text.contains("- Construction: +$200.00 (Wood frame construction)"));
        assert!(text.contains("- Safety discounts: -$100.00"));
        assert!(!text.contains("Pool surcharge"));
    }

    #[test]
    fn missing_details_names_trigger_fields() {
        let state = ConversationState::default();
        assert_eq!(
            missing_details_reply(Some(LineOfBusiness::Auto), &state),
            "To prepare your auto insurance quote I still need your age, vehicle year, years licensed."
        );
        assert_eq!(
            missing_details_reply(None, &state),
            "Are you looking for auto or home insurance?"
        );
    }
}
