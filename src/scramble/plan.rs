use rand::Rng;

use crate::config::ScrambleConfig;

/// When one character position starts scrambling and when it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionTiming {
    pub start: u32,
    pub end: u32,
}

/// Frame-by-frame transition from one string to another.
///
/// Positions before their start tick show the old character, positions
/// between start and end show a filler, positions at or past their end show
/// the new character. Missing characters (strings of different length) render
/// as nothing.
#[derive(Debug, Clone)]
pub struct ScrambleAnimation {
    from: Vec<char>,
    to: Vec<char>,
    timings: Vec<PositionTiming>,
    fillers: Vec<Option<char>>,
    alphabet: Vec<char>,
    reroll_chance: f64,
    tick: u32,
}

impl ScrambleAnimation {
    pub fn new(from: &str, to: &str, config: &ScrambleConfig, rng: &mut impl Rng) -> Self {
        let from: Vec<char> = from.chars().collect();
        let to: Vec<char> = to.chars().collect();
        let length = from.len().max(to.len());

        let min_duration = config.min_duration_ticks.max(1);
        let max_duration = config.max_duration_ticks.max(min_duration);
        let timings = (0..length)
            .map(|index| {
                let stagger = (index as f64 * config.stagger_per_index).floor() as u32;
                let start = rng.gen_range(0..config.start_range_ticks.max(1)) + stagger;
                let end = start + rng.gen_range(min_duration..=max_duration);
                PositionTiming { start, end }
            })
            .collect();

        let mut alphabet: Vec<char> = config.filler_chars.chars().collect();
        if alphabet.is_empty() {
            alphabet.push('#');
        }

        Self {
            from,
            to,
            timings,
            fillers: vec![None; length],
            alphabet,
            reroll_chance: config.reroll_chance.clamp(0.0, 1.0),
            tick: 0,
        }
    }

    pub fn timings(&self) -> &[PositionTiming] {
        &self.timings
    }

    /// Tick at which the last position settles.
    pub fn total_ticks(&self) -> u32 {
        self.timings.iter().map(|t| t.end).max().unwrap_or(0)
    }

    pub fn is_complete(&self) -> bool {
        self.tick >= self.total_ticks()
    }

    pub fn target(&self) -> String {
        self.to.iter().collect()
    }

    /// Render the current tick, then advance. Returns the text to display
    /// and whether the animation has settled.
    pub fn next_frame(&mut self, rng: &mut impl Rng) -> (String, bool) {
        if self.is_complete() {
            return (self.target(), true);
        }

        let mut frame = String::with_capacity(self.timings.len());
        for (index, timing) in self.timings.iter().enumerate() {
            if self.tick >= timing.end {
                if let Some(ch) = self.to.get(index) {
                    frame.push(*ch);
                }
            } else if self.tick >= timing.start {
                let filler = match self.fillers[index] {
                    Some(ch) if !rng.gen_bool(self.reroll_chance) => ch,
                    _ => {
                        let ch = self.alphabet[rng.gen_range(0..self.alphabet.len())];
                        self.fillers[index] = Some(ch);
                        ch
                    }
                };
                frame.push(filler);
            } else if let Some(ch) = self.from.get(index) {
                frame.push(*ch);
            }
        }

        self.tick += 1;
        if self.is_complete() {
            return (self.target(), true);
        }
        (frame, false)
    }
}
