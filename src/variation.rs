//! Look-alike variations of a text.
//!
//! A variation is the template with some Cyrillic letters swapped for the
//! Latin letters that render the same. Generation is randomized: every
//! attempt flips each replaceable letter independently and keeps the result
//! only if it has not been seen yet.

use lazy_static::lazy_static;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use thiserror::Error;

lazy_static! {
    pub static ref SUBSTITUTIONS: HashMap<char, char> = [
        ('а', 'a'),
        ('с', 'c'),
        ('о', 'o'),
        ('р', 'p'),
        ('е', 'e'),
        ('х', 'x'),
        ('у', 'y'),
        ('А', 'A'),
        ('С', 'C'),
        ('О', 'O'),
        ('Р', 'P'),
        ('Е', 'E'),
        ('Х', 'X'),
        ('У', 'Y'),
    ]
    .into_iter()
    .collect();
    pub static ref REVERSE_SUBSTITUTIONS: HashMap<char, char> =
        SUBSTITUTIONS.iter().map(|(&from, &to)| (to, from)).collect();
}

pub fn substitute(c: char) -> Option<char> {
    SUBSTITUTIONS.get(&c).copied()
}

pub fn replaceable_count(text: &str) -> usize {
    text.chars().filter(|c| SUBSTITUTIONS.contains_key(c)).count()
}

/// Distinct variations `text` admits, the template itself excluded.
pub fn capacity(text: &str) -> u64 {
    match replaceable_count(text) {
        k if k >= 64 => u64::MAX,
        k => (1u64 << k) - 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub target: usize,
    pub flip_probability: f64,
    pub max_attempts: usize,
    pub timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            target: 50,
            flip_probability: 0.5,
            max_attempts: 20_000,
            timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LimitsError {
    #[error("the number of variations must be at least 1")]
    ZeroTarget,
    #[error("at most {max} variations can be requested, got {requested}")]
    TargetTooLarge { requested: usize, max: usize },
    #[error("flip probability must be in (0, 1], got {0}")]
    Probability(f64),
    #[error("the attempt budget must be at least 1")]
    ZeroAttempts,
}

impl Limits {
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.target == 0 {
            return Err(LimitsError::ZeroTarget);
        }
        if !(self.flip_probability > 0.0 && self.flip_probability <= 1.0) {
            return Err(LimitsError::Probability(self.flip_probability));
        }
        if self.max_attempts == 0 {
            return Err(LimitsError::ZeroAttempts);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// Every distinct variation of the template has been produced.
    SpaceExhausted,
    AttemptsExhausted,
    TimedOut,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::TargetReached => "target reached",
            StopReason::SpaceExhausted => "no more distinct variations",
            StopReason::AttemptsExhausted => "attempt budget spent",
            StopReason::TimedOut => "time budget spent",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub variations: Vec<String>,
    pub attempts: usize,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

fn candidate<R: Rng + ?Sized>(template: &str, p: f64, rng: &mut R) -> String {
    template
        .chars()
        .map(|c| match substitute(c) {
            Some(latin) if rng.gen_bool(p) => latin,
            _ => c,
        })
        .collect()
}

pub fn generate<R: Rng + ?Sized>(
    template: &str,
    limits: &Limits,
    rng: &mut R,
) -> Result<Outcome, LimitsError> {
    limits.validate()?;

    let started = Instant::now();
    let capacity = capacity(template);
    let (goal, bound_by_capacity) = match u64::try_from(limits.target) {
        Ok(target) if target > capacity => (capacity as usize, true),
        _ => (limits.target, false),
    };

    let mut seen: HashSet<String> = HashSet::with_capacity(goal + 1);
    seen.insert(template.to_owned());
    let mut variations = Vec::with_capacity(goal);
    let mut attempts = 0;

    let stop_reason = loop {
        if variations.len() >= goal {
            break if bound_by_capacity {
                StopReason::SpaceExhausted
            } else {
                StopReason::TargetReached
            };
        }
        if attempts >= limits.max_attempts {
            break StopReason::AttemptsExhausted;
        }
        if started.elapsed() >= limits.timeout {
            break StopReason::TimedOut;
        }

        attempts += 1;
        let variation = candidate(template, limits.flip_probability, rng);
        if seen.insert(variation.clone()) {
            variations.push(variation);
        }
    };

    Ok(Outcome {
        variations,
        attempts,
        elapsed: started.elapsed(),
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn restore(text: &str) -> String {
        text.chars()
            .map(|c| REVERSE_SUBSTITUTIONS.get(&c).copied().unwrap_or(c))
            .collect()
    }

    #[test]
    fn counts_replaceable_letters() {
        assert_eq!(replaceable_count("Привет"), 2);
        assert_eq!(replaceable_count("hello"), 0);
        assert_eq!(capacity("Привет"), 3);
        assert_eq!(capacity("hello"), 0);
        assert_eq!(capacity(&"о".repeat(80)), u64::MAX);
    }

    #[test]
    fn variations_are_unique_and_never_the_template() {
        let template = "Скоро выходные, собираемся на озеро";
        let limits = Limits {
            target: 100,
            ..Limits::default()
        };
        let outcome = generate(template, &limits, &mut rng()).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.variations.len(), 100);
        let unique: HashSet<_> = outcome.variations.iter().collect();
        assert_eq!(unique.len(), 100);
        assert!(outcome.variations.iter().all(|v| v != template));
    }

    #[test]
    fn variations_map_back_to_template() {
        let template = "Сегодня хорошая погода";
        let outcome = generate(template, &Limits::default(), &mut rng()).unwrap();
        for variation in &outcome.variations {
            assert_eq!(restore(variation), template);
            assert_eq!(variation.chars().count(), template.chars().count());
        }
    }

    #[test]
    fn stops_when_space_is_exhausted() {
        // "сор" has three replaceable letters: seven variations at most.
        let limits = Limits {
            target: 50,
            ..Limits::default()
        };
        let outcome = generate("сор", &limits, &mut rng()).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::SpaceExhausted);
        assert_eq!(outcome.variations.len(), 7);
    }

    #[test]
    fn nothing_to_replace_makes_no_attempts() {
        let outcome = generate("plain ascii", &Limits::default(), &mut rng()).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::SpaceExhausted);
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.variations.is_empty());
    }

    #[test]
    fn respects_attempt_budget() {
        let limits = Limits {
            target: 500,
            max_attempts: 10,
            ..Limits::default()
        };
        let outcome = generate(&"о".repeat(30), &limits, &mut rng()).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::AttemptsExhausted);
        assert_eq!(outcome.attempts, 10);
        assert!(outcome.variations.len() <= 10);
    }

    #[test]
    fn respects_time_budget() {
        let limits = Limits {
            target: 500,
            timeout: Duration::ZERO,
            ..Limits::default()
        };
        let outcome = generate(&"о".repeat(30), &limits, &mut rng()).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::TimedOut);
        assert_eq!(outcome.attempts, 0);
    }

    #[test]
    fn certain_flip_yields_single_variation() {
        let limits = Limits {
            target: 5,
            flip_probability: 1.0,
            max_attempts: 20,
            ..Limits::default()
        };
        let outcome = generate("Рост", &limits, &mut rng()).unwrap();
        assert_eq!(outcome.variations, vec!["Pocт".to_string()]);
        assert_eq!(outcome.stop_reason, StopReason::AttemptsExhausted);
    }

    #[test]
    fn rejects_bad_limits() {
        let zero = Limits {
            target: 0,
            ..Limits::default()
        };
        assert_eq!(
            generate("а", &zero, &mut rng()).unwrap_err(),
            LimitsError::ZeroTarget
        );

        let never = Limits {
            flip_probability: 0.0,
            ..Limits::default()
        };
        assert_eq!(
            generate("а", &never, &mut rng()).unwrap_err(),
            LimitsError::Probability(0.0)
        );

        let no_attempts = Limits {
            max_attempts: 0,
            ..Limits::default()
        };
        assert_eq!(no_attempts.validate(), Err(LimitsError::ZeroAttempts));
    }
}
