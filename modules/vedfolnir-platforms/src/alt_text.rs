/// True when `text` carries no meaningful description: empty, pure
/// whitespace, or made up entirely of emoji/pictographic characters.
/// Whitespace/emoji-only alt text is treated the same as missing alt text.
pub fn is_meaningless(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    trimmed.chars().all(is_emoji_or_decoration)
}

fn is_emoji_or_decoration(c: char) -> bool {
    if c.is_whitespace() {
        return true;
    }
    let code = c as u32;
    matches!(code,
        0x1F300..=0x1FAFF // misc symbols & pictographs, emoticons, transport, supplemental
        | 0x2600..=0x27BF  // misc symbols, dingbats
        | 0x2190..=0x21FF  // arrows (used as decoration)
        | 0xFE0F           // variation selector-16
        | 0x200D           // zero-width joiner (emoji sequences)
        | 0x2B00..=0x2BFF  // misc symbols & arrows
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_are_meaningless() {
        assert!(is_meaningless(""));
        assert!(is_meaningless("   "));
        assert!(is_meaningless("\n\t "));
    }

    #[test]
    fn single_emoji_is_meaningless() {
        assert!(is_meaningless("\u{1F600}"));
    }

    #[test]
    fn mixed_emoji_and_space_is_meaningless() {
        assert!(is_meaningless("  \u{1F600} \u{1F923}  "));
    }

    #[test]
    fn real_text_is_meaningful() {
        assert!(!is_meaningless("A red car parked on a street."));
    }

    #[test]
    fn emoji_with_real_words_is_meaningful() {
        assert!(!is_meaningless("A cat \u{1F431} sleeping on a couch"));
    }
}
