use futures::Future;
use teloxide::{
    requests::Requester,
    types::{Message, Recipient},
    Bot, RequestError,
};

/// Maximum size of a single text message, in bytes. Telegram actually counts
/// characters, so going by bytes is on the safe side.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

pub trait BotSendLongText {
    /// Send a message as plain text (no parse mode, so whatever a model
    /// spits out can't break the markup), split into however many messages
    /// it takes to fit under [`TELEGRAM_MESSAGE_LIMIT`].
    ///
    /// Stops on the first failed send and returns its error. No retries.
    /// Text that is empty after trimming sends nothing.
    fn send_long_text<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: &'a str,
    ) -> impl Future<Output = Result<Vec<Message>, RequestError>> + Send;
}

impl BotSendLongText for Bot {
    async fn send_long_text<'a>(
        &'a self,
        to_where: impl Into<Recipient> + Send,
        text: &'a str,
    ) -> Result<Vec<Message>, RequestError> {
        let to_where: Recipient = to_where.into();
        let mut sent_messages = Vec::new();

        for chunk in SplitOverLengthTokens::new(text, TELEGRAM_MESSAGE_LIMIT) {
            sent_messages.push(self.send_message(to_where.clone(), chunk).await?);
        }

        Ok(sent_messages)
    }
}

/// Boundaries text can be split at, from the most to the least preferable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SplitLevel {
    /// "\n\n\n"
    Section,
    /// "\n\n"
    Paragraph,
    /// "\n"
    Line,
    /// Any ASCII whitespace.
    Word,
    /// Between any two characters.
    Char,
}

impl SplitLevel {
    const ALL: [SplitLevel; 5] = [
        SplitLevel::Section,
        SplitLevel::Paragraph,
        SplitLevel::Line,
        SplitLevel::Word,
        SplitLevel::Char,
    ];

    fn separator(self) -> Option<&'static str> {
        match self {
            SplitLevel::Section => Some("\n\n\n"),
            SplitLevel::Paragraph => Some("\n\n"),
            SplitLevel::Line => Some("\n"),
            SplitLevel::Word | SplitLevel::Char => None,
        }
    }

    /// Length of the first piece of `text` at this level, before its first boundary.
    fn first_piece_len(self, text: &str) -> usize {
        match self {
            SplitLevel::Word => text
                .find(|x: char| x.is_ascii_whitespace())
                .unwrap_or(text.len()),
            SplitLevel::Char => text.chars().next().map_or(0, char::len_utf8),
            _ => self
                .separator()
                .and_then(|sep| text.find(sep))
                .unwrap_or(text.len()),
        }
    }

    /// Last boundary of this level that is at most `max_len` bytes into `text`.
    fn last_boundary_within(self, text: &str, max_len: usize) -> Option<usize> {
        match self {
            SplitLevel::Word => text
                .char_indices()
                .filter(|(_, c)| c.is_ascii_whitespace())
                .map(|(i, _)| i)
                .take_while(|&i| i <= max_len)
                .last(),
            SplitLevel::Char => (1..=max_len.min(text.len()))
                .rev()
                .find(|&i| text.is_char_boundary(i)),
            _ => {
                let sep = self.separator()?;
                text.match_indices(sep)
                    .map(|(i, _)| i)
                    .take_while(|&i| i <= max_len)
                    .last()
            }
        }
    }
}

/// Iterator that splits text into chunks, all of which are under a specified size.
///
/// Splits by sections (separated by 3 newlines), then by paragraphs (2 newlines),
/// then by lines (1 newline), then by word (ASCII whitespace), then character by character,
/// picking the biggest boundary kind that still lets the first piece fit.
/// Leading and trailing whitespace of every chunk is dropped.
pub struct SplitOverLengthTokens<'a> {
    data: &'a str,
    max_len: usize,
}

impl<'a> SplitOverLengthTokens<'a> {
    /// Create a new splitter with specified max length by bytes.
    ///
    /// # Panics
    /// Panics if a max length less than 4 is specified.
    /// It may be impossible to output data at such lengths due to
    /// characters being up to 4 bytes in size.
    #[must_use]
    pub fn new(data: &str, max_len: usize) -> SplitOverLengthTokens<'_> {
        assert!(max_len >= 4, "Max length is too small");
        SplitOverLengthTokens { data, max_len }
    }
}

impl<'a> Iterator for SplitOverLengthTokens<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<Self::Item> {
        self.data = self.data.trim_start();
        if self.data.is_empty() {
            return None;
        }

        if self.data.len() <= self.max_len {
            return Some(std::mem::take(&mut self.data).trim_end());
        }

        let level = SplitLevel::ALL
            .into_iter()
            .find(|level| level.first_piece_len(self.data) <= self.max_len)
            .unwrap_or(SplitLevel::Char);

        // The first piece fits, so there's always a boundary within reach.
        let cut = level
            .last_boundary_within(self.data, self.max_len)
            .unwrap_or_else(|| level.first_piece_len(self.data));

        let (chunk, rest) = self.data.split_at(cut);
        self.data = rest;
        Some(chunk.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::SplitOverLengthTokens;

    #[test]
    fn word_split() {
        let data = "hi hello hi   HELLO!!!";
        assert_eq!(data.len(), 22);
        let mut splitter = SplitOverLengthTokens::new(data, 22);
        assert_eq!(splitter.next(), Some(data));
        assert_eq!(splitter.next(), None);

        let mut splitter = SplitOverLengthTokens::new(data, 21);
        assert_eq!(splitter.next(), Some("hi hello hi"));
        assert_eq!(splitter.next(), Some("HELLO!!!"));
        assert_eq!(splitter.next(), None);
    }

    #[test]
    fn word_and_char_split() {
        let data = "12345 123456 1234567 123 123456";
        let mut splitter = SplitOverLengthTokens::new(data, 6);
        assert_eq!(splitter.next(), Some("12345"));
        assert_eq!(splitter.next(), Some("123456"));
        assert_eq!(splitter.next(), Some("123456"));
        assert_eq!(splitter.next(), Some("7 123"));
        assert_eq!(splitter.next(), Some("123456"));
        assert_eq!(splitter.next(), None);
    }

    #[test]
    fn line_word_char_splits() {
        let data = "12345 12345\n12345\n12\n12\n1234567";
        let mut splitter = SplitOverLengthTokens::new(data, 6);
        assert_eq!(splitter.next(), Some("12345"));
        assert_eq!(splitter.next(), Some("12345"));
        assert_eq!(splitter.next(), Some("12345"));
        assert_eq!(splitter.next(), Some("12\n12"));
        assert_eq!(splitter.next(), Some("123456"));
        assert_eq!(splitter.next(), Some("7"));
        assert_eq!(splitter.next(), None);
    }

    #[test]
    fn paragraphs_stay_together_when_they_fit() {
        let data = "first line\nsecond\n\nthird paragraph";
        let mut splitter = SplitOverLengthTokens::new(data, 20);
        assert_eq!(splitter.next(), Some("first line\nsecond"));
        assert_eq!(splitter.next(), Some("third paragraph"));
        assert_eq!(splitter.next(), None);
    }

    #[test]
    fn multibyte_chars_are_never_cut() {
        // Each of these is 4 bytes.
        let data = "🐱🐱🐱";
        let chunks: Vec<_> = SplitOverLengthTokens::new(data, 6).collect();
        assert_eq!(chunks, vec!["🐱", "🐱", "🐱"]);
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert_eq!(SplitOverLengthTokens::new("  \n\n ", 10).next(), None);
        assert_eq!(SplitOverLengthTokens::new("", 10).next(), None);
    }
}
