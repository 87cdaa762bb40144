//! # Sentiment Aggregation
//! Pure helpers that fold per-item sentiment signals into narrative-level
//! aggregates. No I/O; per-item sentiment is supplied by the upstream
//! tagger, never derived from text here.

use crate::model::{ContentItem, Sentiment, SentimentBreakdown};

/// Majority vote across constituent items. Items without a signal abstain;
/// ties and an all-abstain vote both resolve to neutral.
pub fn majority_sentiment<'a, I>(items: I) -> Sentiment
where
    I: IntoIterator<Item = &'a ContentItem>,
{
    let mut bullish = 0usize;
    let mut bearish = 0usize;
    let mut neutral = 0usize;

    for it in items {
        match it.sentiment {
            Some(Sentiment::Bullish) => bullish += 1,
            Some(Sentiment::Bearish) => bearish += 1,
            Some(Sentiment::Neutral) => neutral += 1,
            None => {}
        }
    }

    let top = bullish.max(bearish).max(neutral);
    if top == 0 {
        return Sentiment::Neutral;
    }
    // A shared maximum is a tie.
    let winners =
        usize::from(bullish == top) + usize::from(bearish == top) + usize::from(neutral == top);
    if winners > 1 {
        return Sentiment::Neutral;
    }
    if bullish == top {
        Sentiment::Bullish
    } else if bearish == top {
        Sentiment::Bearish
    } else {
        Sentiment::Neutral
    }
}

/// Sentiment mix of a set of items; unsignalled items count as neutral.
pub fn breakdown<'a, I>(items: I) -> SentimentBreakdown
where
    I: IntoIterator<Item = &'a ContentItem>,
{
    let mut b = SentimentBreakdown::default();
    for it in items {
        b.add(it.sentiment);
    }
    b
}
