use std::time::{Duration, Instant};

use crate::submission::SubmissionId;

const FRESH_CAPTION_DELAY: Duration = Duration::from_millis(200);
const FRESH_CAPTION_DELAY_PER_CHAR: Duration = Duration::from_millis(10);
const REHYDRATED_CAPTION_DELAY: Duration = Duration::from_millis(1000);
const REHYDRATED_CAPTION_DELAY_PER_CHAR: Duration = Duration::from_millis(30);

/// Pace of a reveal. Text advances one character per `per_char`; captions
/// show up after `caption_delay` plus `caption_delay_per_char` for every
/// reasoning character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealTiming {
    pub per_char: Duration,
    pub caption_delay: Duration,
    pub caption_delay_per_char: Duration,
}

impl RevealTiming {
    pub fn fresh(per_char: Duration) -> Self {
        Self {
            per_char,
            caption_delay: FRESH_CAPTION_DELAY,
            caption_delay_per_char: FRESH_CAPTION_DELAY_PER_CHAR,
        }
    }

    pub fn rehydrated(per_char: Duration) -> Self {
        Self {
            per_char,
            caption_delay: REHYDRATED_CAPTION_DELAY,
            caption_delay_per_char: REHYDRATED_CAPTION_DELAY_PER_CHAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealPlan {
    pub description_chars: usize,
    pub reasoning_chars: usize,
    pub timing: RevealTiming,
}

impl RevealPlan {
    pub fn new(description: &str, reasoning: Option<&str>, timing: RevealTiming) -> Self {
        Self {
            description_chars: description.chars().count(),
            reasoning_chars: reasoning.map(|text| text.chars().count()).unwrap_or(0),
            timing,
        }
    }

    fn captions_at(&self) -> Duration {
        let per_char = u32::try_from(self.reasoning_chars).unwrap_or(u32::MAX);
        self.timing.caption_delay + self.timing.caption_delay_per_char.saturating_mul(per_char)
    }

    /// Instant offset at which every part of the plan is fully shown.
    pub fn total(&self) -> Duration {
        let longest = u32::try_from(self.description_chars.max(self.reasoning_chars))
            .unwrap_or(u32::MAX);
        self.timing
            .per_char
            .saturating_mul(longest)
            .max(self.captions_at())
    }
}

/// Cursor positions for one instant. Cursors count characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealFrame {
    pub owner: SubmissionId,
    pub description: usize,
    pub description_total: usize,
    pub reasoning: usize,
    pub reasoning_total: usize,
    pub captions_visible: bool,
}

impl RevealFrame {
    pub fn is_complete(&self) -> bool {
        self.description == self.description_total
            && self.reasoning == self.reasoning_total
            && self.captions_visible
    }
}

#[derive(Debug)]
struct ActiveReveal {
    owner: SubmissionId,
    started: Instant,
    plan: RevealPlan,
    shown: Option<RevealFrame>,
}

/// Drives at most one reveal at a time. Arming a new plan or cancelling
/// drops the old one; frames are only handed to the current owner.
#[derive(Debug, Default)]
pub struct RevealScheduler {
    active: Option<ActiveReveal>,
}

impl RevealScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, owner: SubmissionId, plan: RevealPlan, now: Instant) {
        self.active = Some(ActiveReveal {
            owner,
            started: now,
            plan,
            shown: None,
        });
    }

    pub fn cancel(&mut self) -> Option<SubmissionId> {
        self.active.take().map(|active| active.owner)
    }

    pub fn owner(&self) -> Option<SubmissionId> {
        self.active.as_ref().map(|active| active.owner)
    }

    /// Frame at `now` for `owner`. Cursors never move backwards, even if
    /// `now` does.
    pub fn frame(&mut self, owner: SubmissionId, now: Instant) -> Option<RevealFrame> {
        let active = self.active.as_mut().filter(|active| active.owner == owner)?;
        let elapsed = now.saturating_duration_since(active.started);
        let plan = active.plan;
        let chars_at = |total: usize| -> usize {
            let step = plan.timing.per_char.as_nanos().max(1);
            let revealed = elapsed.as_nanos() / step;
            usize::try_from(revealed).unwrap_or(usize::MAX).min(total)
        };

        let mut frame = RevealFrame {
            owner,
            description: chars_at(plan.description_chars),
            description_total: plan.description_chars,
            reasoning: chars_at(plan.reasoning_chars),
            reasoning_total: plan.reasoning_chars,
            captions_visible: elapsed >= plan.captions_at(),
        };
        if let Some(previous) = active.shown {
            frame.description = frame.description.max(previous.description);
            frame.reasoning = frame.reasoning.max(previous.reasoning);
            frame.captions_visible |= previous.captions_visible;
        }
        active.shown = Some(frame);
        Some(frame)
    }
}

/// First `cursor` characters of `text`.
pub fn revealed_prefix(text: &str, cursor: usize) -> &str {
    match text.char_indices().nth(cursor) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{revealed_prefix, RevealPlan, RevealScheduler, RevealTiming};
    use crate::submission::SubmissionId;

    fn owners() -> (SubmissionId, SubmissionId) {
        (SubmissionId::from_raw(1), SubmissionId::from_raw(2))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn text_starts_hidden_and_advances_per_char() {
        let (owner, _) = owners();
        let start = Instant::now();
        let mut scheduler = RevealScheduler::new();
        let plan = RevealPlan::new("hello", Some("why"), RevealTiming::fresh(ms(30)));
        scheduler.arm(owner, plan, start);

        let first = scheduler.frame(owner, start).unwrap();
        assert_eq!(first.description, 0);
        assert!(!first.captions_visible);

        let mid = scheduler.frame(owner, start + ms(65)).unwrap();
        assert_eq!(mid.description, 2);
        assert_eq!(mid.reasoning, 2);

        let done = scheduler.frame(owner, start + plan.total()).unwrap();
        assert_eq!(done.description, 5);
        assert_eq!(done.reasoning, 3);
        assert!(done.is_complete());
    }

    #[test]
    fn caption_delay_depends_on_reasoning_and_origin() {
        let fresh = RevealPlan::new("d", Some("0123456789"), RevealTiming::fresh(ms(30)));
        let rehydrated = RevealPlan::new("d", Some("0123456789"), RevealTiming::rehydrated(ms(30)));
        assert_eq!(fresh.captions_at(), ms(300));
        assert_eq!(rehydrated.captions_at(), ms(1300));

        let (owner, _) = owners();
        let start = Instant::now();
        let mut scheduler = RevealScheduler::new();
        scheduler.arm(owner, fresh, start);
        assert!(!scheduler.frame(owner, start + ms(299)).unwrap().captions_visible);
        assert!(scheduler.frame(owner, start + ms(300)).unwrap().captions_visible);
    }

    #[test]
    fn cursors_never_move_backwards() {
        let (owner, _) = owners();
        let start = Instant::now();
        let mut scheduler = RevealScheduler::new();
        scheduler.arm(owner, RevealPlan::new("abcdef", None, RevealTiming::fresh(ms(10))), start);

        let later = scheduler.frame(owner, start + ms(45)).unwrap();
        let earlier = scheduler.frame(owner, start + ms(5)).unwrap();
        assert_eq!(later.description, 4);
        assert_eq!(earlier.description, 4);
    }

    #[test]
    fn only_current_owner_gets_frames() {
        let (first, second) = owners();
        let start = Instant::now();
        let mut scheduler = RevealScheduler::new();
        let plan = RevealPlan::new("abc", None, RevealTiming::fresh(ms(10)));
        scheduler.arm(first, plan, start);
        scheduler.arm(second, plan, start);

        assert!(scheduler.frame(first, start + ms(20)).is_none());
        assert!(scheduler.frame(second, start + ms(20)).is_some());
        assert_eq!(scheduler.cancel(), Some(second));
        assert!(scheduler.frame(second, start + ms(30)).is_none());
    }

    #[test]
    fn prefix_counts_characters() {
        assert_eq!(revealed_prefix("héllo", 2), "hé");
        assert_eq!(revealed_prefix("héllo", 0), "");
        assert_eq!(revealed_prefix("héllo", 99), "héllo");
    }
}
