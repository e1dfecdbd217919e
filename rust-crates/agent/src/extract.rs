//! Pure text extractors used by the sniper and the ticket handler.

use crate::money::{
    Network,
    Usd,
};
use regex::Regex;
use std::sync::LazyLock;

/// Prefix on every dice announcement the agent posts.
pub const ROLL_MARKER: &str = "🎲";

static BET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[^\w.$])\$?(\d{1,7}(?:\.\d{1,2})?)\s*vs?\s*\$?(\d{1,7}(?:\.\d{1,2})?)(?:\W|$)",
    )
    .expect("bet pattern compiles")
});

static LTC_LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[LM3][a-km-zA-HJ-NP-Z1-9]{26,33}$").expect("ltc pattern compiles")
});
static LTC_BECH32: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ltc1[ac-hj-np-z02-9]{39,59}$").expect("ltc bech32 pattern compiles")
});
static SOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("sol pattern compiles")
});
static BTC_LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("btc pattern compiles")
});
static BTC_BECH32: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bc1[ac-hj-np-z02-9]{39,59}$").expect("btc bech32 pattern compiles")
});

static GAME_START_MENTION_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<@!?(\d+)>\s*(?:(?:goes|go|rolls|roll|is|starts|start)\s+)?(?:first|1st|starts\b)",
    )
    .expect("game start pattern compiles")
});
static GAME_START_FIRST_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:first|1st)\s*(?:is|:|-|=)?\s*<@!?(\d+)>")
        .expect("game start pattern compiles")
});

static DICE_ROLLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rolled\s*(?:a\s+)?\**\s*(\d+)").expect("dice pattern compiles")
});
static DICE_EMOJI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"🎲\s*\**\s*(\d+)").expect("dice pattern compiles"));
static DICE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\s*(\d+)\s*\]").expect("dice pattern compiles"));
static DICE_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\s*(\d+)\s*\*\*").expect("dice pattern compiles"));

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").expect("mention pattern compiles"));

static CONFIRMATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:confirmed|received|got\s+it|paid|both\s+paid|gl|good\s+luck|start\s+the\s+game|ready)\b",
    )
    .expect("confirmation pattern compiles")
});

static CANCELLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:cancel|cancelled|canceled|abort|nevermind|never\s+mind)\b")
        .expect("cancellation pattern compiles")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetOffer {
    /// Left-hand amount, the opponent's stake.
    pub opponent: Usd,
    pub raw: (Usd, Usd),
}

impl BetOffer {
    pub fn is_matched(&self) -> bool {
        self.raw.0 == self.raw.1
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiceRoll {
    pub value: u8,
    pub target_id: Option<String>,
}

pub fn extract_bet(text: &str) -> Option<BetOffer> {
    let captures = BET.captures(text)?;
    let left = parse_usd(captures.get(1)?.as_str())?;
    let right = parse_usd(captures.get(2)?.as_str())?;
    if left.is_zero() {
        return None;
    }
    Some(BetOffer {
        opponent: left,
        raw: (left, right),
    })
}

fn parse_usd(raw: &str) -> Option<Usd> {
    raw.parse::<f64>().ok().and_then(Usd::from_dollars)
}

pub fn is_valid_address(address: &str, network: Network) -> bool {
    match network {
        Network::Ltc => LTC_LEGACY.is_match(address) || LTC_BECH32.is_match(address),
        Network::Sol => SOL.is_match(address),
        Network::Btc => BTC_LEGACY.is_match(address) || BTC_BECH32.is_match(address),
    }
}

/// First whitespace-delimited token that is a valid address once markdown and
/// punctuation are stripped.
pub fn extract_address(text: &str, network: Network) -> Option<String> {
    text.split_whitespace()
        .map(strip_formatting)
        .find(|token| is_valid_address(token, network))
        .map(str::to_string)
}

/// Whether some token has the length and alphabet of an address without being
/// one.
pub fn looks_like_address(text: &str) -> bool {
    text.split_whitespace().map(strip_formatting).any(|token| {
        (25..=64).contains(&token.len()) && token.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

fn strip_formatting(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_ascii_alphanumeric())
}

/// Id of the mentioned user declared to roll first.
pub fn extract_game_start(text: &str) -> Option<String> {
    GAME_START_MENTION_FIRST
        .captures(text)
        .or_else(|| GAME_START_FIRST_MENTION.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn extract_dice_result(text: &str, mentions: &[String]) -> Option<DiceRoll> {
    let value = [&*DICE_ROLLED, &*DICE_EMOJI, &*DICE_BRACKET, &*DICE_BOLD]
        .into_iter()
        .find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|captures| captures.get(1))
                .and_then(|m| m.as_str().parse::<u8>().ok())
        })?;
    if !(1..=6).contains(&value) {
        return None;
    }
    let target_id = MENTION
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| mentions.first().cloned());
    Some(DiceRoll { value, target_id })
}

pub fn is_payment_confirmation(text: &str) -> bool {
    CONFIRMATION.is_match(text)
}

pub fn is_cancellation(text: &str) -> bool {
    CANCELLATION.is_match(text)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    const LTC_ADDRESS: &str = "LY7VX5yZgVbEsL3kS9F2a8B4c5D6e7F8g9";

    #[test]
    fn extract_bet__reads_plain_offer() {
        let offer = extract_bet("anyone 15v15?").unwrap();

        assert_eq!(offer.opponent, Usd::from_cents(1_500));
        assert!(offer.is_matched());
    }

    #[test]
    fn extract_bet__accepts_dollar_signs_cents_and_vs() {
        let offer = extract_bet("$12.50 VS $12.5 first to 5").unwrap();

        assert_eq!(offer.opponent, Usd::from_cents(1_250));
        assert_eq!(offer.raw, (Usd::from_cents(1_250), Usd::from_cents(1_250)));
    }

    #[test]
    fn extract_bet__returns_left_amount_for_mismatched_offer() {
        let offer = extract_bet("10v20 anyone").unwrap();

        assert_eq!(offer.opponent, Usd::from_cents(1_000));
        assert!(!offer.is_matched());
    }

    #[test]
    fn extract_bet__ignores_text_without_offer() {
        assert_eq!(extract_bet("gg well played"), None);
        assert_eq!(extract_bet("version 2v"), None);
        assert_eq!(extract_bet("0v0"), None);
    }

    #[test]
    fn is_valid_address__recognises_each_network() {
        assert!(is_valid_address(LTC_ADDRESS, Network::Ltc));
        assert!(is_valid_address(
            "ltc1qg82f7ls4q7x9a8zq6v9xq8wr6d3x4wq7h9k3p2",
            Network::Ltc
        ));
        assert!(is_valid_address(
            "7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV",
            Network::Sol
        ));
        assert!(is_valid_address("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", Network::Btc));
        assert!(is_valid_address(
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            Network::Btc
        ));
        assert!(!is_valid_address("LI0lO", Network::Ltc));
        assert!(!is_valid_address(LTC_ADDRESS, Network::Btc));
    }

    #[test]
    fn extract_address__strips_markdown_and_punctuation() {
        let text = format!("Send to `{LTC_ADDRESS}`, thanks!");

        assert_eq!(
            extract_address(&text, Network::Ltc).as_deref(),
            Some(LTC_ADDRESS)
        );
        assert_eq!(extract_address("send to me", Network::Ltc), None);
    }

    #[test]
    fn looks_like_address__flags_broken_addresses() {
        assert!(looks_like_address("send to LI0lOxxxxxxxxxxxxxxxxxxxxxxxxxx"));
        assert!(!looks_like_address("send it please"));
    }

    #[test]
    fn extract_game_start__reads_both_word_orders() {
        assert_eq!(extract_game_start("<@42> first").as_deref(), Some("42"));
        assert_eq!(extract_game_start("<@!42> goes first gl").as_deref(), Some("42"));
        assert_eq!(extract_game_start("first: <@7>").as_deref(), Some("7"));
        assert_eq!(extract_game_start("who goes first?"), None);
    }

    #[test]
    fn extract_dice_result__recognises_common_formats() {
        let cases = [
            ("<@5> rolled a 4", 4),
            ("🎲 6", 6),
            ("result: [3]", 3),
            ("you got **2**", 2),
        ];
        for (text, expected) in cases {
            let roll = extract_dice_result(text, &[]).unwrap();
            assert_eq!(roll.value, expected, "{text}");
        }
    }

    #[test]
    fn extract_dice_result__prefers_inline_mention_as_target() {
        let roll = extract_dice_result("<@99> rolled a 5", &["12".to_string()]).unwrap();
        assert_eq!(roll.target_id.as_deref(), Some("99"));

        let roll = extract_dice_result("rolled a 5", &["12".to_string()]).unwrap();
        assert_eq!(roll.target_id.as_deref(), Some("12"));
    }

    #[test]
    fn extract_dice_result__rejects_values_off_the_die() {
        assert_eq!(extract_dice_result("rolled a 7", &[]), None);
        assert_eq!(extract_dice_result("rolled a 0", &[]), None);
    }

    #[test]
    fn is_payment_confirmation__matches_positive_words_only() {
        assert!(is_payment_confirmation("gl"));
        assert!(is_payment_confirmation("Both paid, start the game"));
        assert!(is_payment_confirmation("got it"));
        assert!(!is_payment_confirmation("glad to help"));
        assert!(!is_payment_confirmation("waiting"));
    }

    #[test]
    fn is_cancellation__matches_keywords() {
        assert!(is_cancellation("cancel pls"));
        assert!(is_cancellation("never mind"));
        assert!(!is_cancellation("cancellation policy"));
    }
}
